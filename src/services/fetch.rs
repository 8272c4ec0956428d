use crate::client::PriceFeed;
use crate::models::price::PriceEntry;
use crate::store::{PriceStore, RETENTION};
use crate::utils::{lookahead_window, next_fetch_delay};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, after, select};
use log::{debug, error, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// First hour of the lookahead band, today.
    pub window_start_hour: u32,
    /// Exclusive end hour of the lookahead band, tomorrow.
    pub window_end_hour: u32,
    /// Fetches fire on multiples of this many minutes past midnight.
    pub align_minutes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Feed unreachable; the store was not touched.
    FeedFailed { cached: Option<PriceEntry> },
    Updated {
        added: usize,
        pruned: usize,
        /// Set when this fetch (re)computed the cheapest hour.
        cheapest_hour: Option<DateTime<Utc>>,
    },
}

/// Fetch once immediately, then on every aligned boundary until `shutdown`
/// fires or disconnects. The wait is recomputed after every fetch, so a
/// slow fetch never shifts later boundaries.
pub fn run_loop<F: PriceFeed + ?Sized>(feed: &F, store: &PriceStore, settings: FetchSettings, shutdown: &Receiver<()>) {
    fetch_and_calculate(feed, store, settings, Utc::now());

    loop {
        let delay = next_fetch_delay(Utc::now(), settings.align_minutes);
        debug!("Next price fetch in {}s", delay.as_secs());
        select! {
            recv(shutdown) -> _ => {
                info!("Price fetch loop stopping");
                return;
            }
            recv(after(delay)) -> _ => {
                fetch_and_calculate(feed, store, settings, Utc::now());
            }
        }
    }
}

pub fn fetch_and_calculate<F: PriceFeed + ?Sized>(
    feed: &F,
    store: &PriceStore,
    settings: FetchSettings,
    now: DateTime<Utc>,
) -> FetchOutcome {
    let prices = match feed.fetch_prices() {
        Ok(p) => p,
        Err(e) => {
            error!("Price fetch failed: {}", e);
            let cached = store.current_price(now);
            if let Some(curr) = cached.as_ref() {
                warn!(
                    "Using cached price for {}: {} {} ({})",
                    curr.timestamp, curr.total, curr.currency, curr.level
                );
                log_classification(store, curr);
            }
            return FetchOutcome::FeedFailed { cached };
        }
    };

    let cutoff = now - RETENTION;
    let mut added = 0;
    for p in prices {
        if p.timestamp < cutoff {
            continue;
        }
        store.add(p);
        added += 1;
    }
    let pruned = store.clear_old(now);
    info!(
        "Stored {} price entries ({} pruned, {} cached, known until {})",
        added,
        pruned,
        store.len(),
        store
            .latest()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    if let Some(curr) = store.current_price(now) {
        log_classification(store, &curr);
    }

    let cheapest_hour = maybe_calculate(store, settings, now);
    FetchOutcome::Updated {
        added,
        pruned,
        cheapest_hour,
    }
}

/// Recompute the cheapest hour at most once per calendar day, and only once
/// tomorrow's prices are known.
fn maybe_calculate(store: &PriceStore, settings: FetchSettings, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !store.has_tomorrow_prices(now) {
        debug!("Tomorrow's prices not published yet");
        return None;
    }
    if store.last_calculated().map(|t| t.date_naive()) == Some(now.date_naive()) {
        return None;
    }

    let (from, to) = lookahead_window(now, settings.window_start_hour, settings.window_end_hour);
    match store.calculate_cheapest_hour(from, to) {
        Some(hour) => {
            store.set_cheapest_hour(hour);
            store.set_last_calculated(now);
            info!("Cheapest hour between {} and {} is {}", from, to, hour);
            Some(hour)
        }
        None => {
            // last_calculated stays put so the next fetch tries again.
            warn!("No prices between {} and {}; cheapest hour unchanged", from, to);
            None
        }
    }
}

fn log_classification(store: &PriceStore, entry: &PriceEntry) {
    if let Some((level, ratio)) = store.classify_level(entry.timestamp, entry.total) {
        debug!(
            "Price {} at {} is {} ({:.2}x trailing average; feed says {})",
            entry.total, entry.timestamp, level, ratio, entry.level
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FeedError;
    use crate::models::price::PriceLevel;
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;

    const SETTINGS: FetchSettings = FetchSettings {
        window_start_hour: 18,
        window_end_hour: 9,
        align_minutes: 60,
    };

    /// Returns its configured entries, or a transport error when `None`.
    struct FakeFeed {
        response: RefCell<Option<Vec<PriceEntry>>>,
    }

    impl FakeFeed {
        fn ok(entries: Vec<PriceEntry>) -> Self {
            FakeFeed {
                response: RefCell::new(Some(entries)),
            }
        }

        fn failing() -> Self {
            FakeFeed {
                response: RefCell::new(None),
            }
        }

        fn set(&self, entries: Vec<PriceEntry>) {
            *self.response.borrow_mut() = Some(entries);
        }
    }

    impl PriceFeed for FakeFeed {
        fn fetch_prices(&self) -> Result<Vec<PriceEntry>, FeedError> {
            self.response
                .borrow()
                .clone()
                .ok_or_else(|| FeedError::Transport("connection refused".into()))
        }
    }

    fn entry(t: DateTime<Utc>, total: f64) -> PriceEntry {
        PriceEntry {
            timestamp: t,
            total,
            energy: total,
            tax: 0.0,
            currency: "SEK".into(),
            level: PriceLevel::Normal,
        }
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    /// Hourly prices for 1 March 00:00 .. 2 March 23:00, cheapest at 2 March 03:00.
    fn two_days() -> Vec<PriceEntry> {
        (0..48)
            .map(|h| {
                let t = day(1, 0) + Duration::hours(h);
                let total = if t == day(2, 3) { 0.45 } else { 0.50 + h as f64 * 0.01 };
                entry(t, total)
            })
            .collect()
    }

    #[test]
    fn computes_cheapest_hour_once_tomorrow_is_known() {
        let store = PriceStore::new();
        let feed = FakeFeed::ok(two_days());
        let now = day(1, 13) + Duration::minutes(2);

        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, now);
        assert_eq!(
            outcome,
            FetchOutcome::Updated {
                added: 48,
                pruned: 0,
                cheapest_hour: Some(day(2, 3)),
            }
        );
        assert_eq!(store.cheapest_hour(), Some(day(2, 3)));
        assert_eq!(store.last_calculated(), Some(now));
    }

    #[test]
    fn does_not_recompute_same_day() {
        let store = PriceStore::new();
        let feed = FakeFeed::ok(two_days());
        fetch_and_calculate(&feed, &store, SETTINGS, day(1, 13));

        let mut cheaper = two_days();
        cheaper.push(entry(day(1, 20), 0.01));
        feed.set(cheaper);
        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, day(1, 14));

        assert!(matches!(outcome, FetchOutcome::Updated { cheapest_hour: None, .. }));
        assert_eq!(store.cheapest_hour(), Some(day(2, 3)));
        assert_eq!(store.last_calculated(), Some(day(1, 13)));
    }

    #[test]
    fn waits_for_tomorrow_prices() {
        let store = PriceStore::new();
        let today_only: Vec<_> = two_days().into_iter().take(24).collect();
        let feed = FakeFeed::ok(today_only);

        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, day(1, 10));
        assert!(matches!(outcome, FetchOutcome::Updated { added: 24, cheapest_hour: None, .. }));
        assert_eq!(store.cheapest_hour(), None);
        assert_eq!(store.last_calculated(), None);
    }

    #[test]
    fn skips_stale_entries_and_prunes() {
        let store = PriceStore::new();
        store.add(entry(day(1, 0) - Duration::hours(30), 0.3));
        let mut prices = two_days();
        prices.push(entry(day(1, 0) - Duration::hours(26), 0.2));
        let feed = FakeFeed::ok(prices);

        let now = day(1, 1);
        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, now);
        assert!(matches!(outcome, FetchOutcome::Updated { added: 48, pruned: 1, .. }));
        assert!(store.sorted_by_time().iter().all(|e| e.timestamp >= now - RETENTION));
    }

    #[test]
    fn feed_failure_leaves_store_untouched() {
        let store = PriceStore::new();
        store.add(entry(day(1, 10), 0.42));
        store.set_cheapest_hour(day(1, 3));
        let feed = FakeFeed::failing();

        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, day(1, 10) + Duration::minutes(30));
        assert_eq!(
            outcome,
            FetchOutcome::FeedFailed {
                cached: Some(entry(day(1, 10), 0.42))
            }
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.cheapest_hour(), Some(day(1, 3)));

        let outcome = fetch_and_calculate(&feed, &store, SETTINGS, day(1, 12));
        assert_eq!(outcome, FetchOutcome::FeedFailed { cached: None });
    }

    #[test]
    fn empty_window_keeps_retrying() {
        let store = PriceStore::new();
        // Only tomorrow afternoon: tomorrow is "known" but the band is empty.
        let feed = FakeFeed::ok(vec![entry(day(2, 14), 0.3)]);

        fetch_and_calculate(&feed, &store, SETTINGS, day(1, 13));
        assert_eq!(store.cheapest_hour(), None);
        assert_eq!(store.last_calculated(), None);

        feed.set(vec![entry(day(2, 14), 0.3), entry(day(2, 2), 0.4)]);
        fetch_and_calculate(&feed, &store, SETTINGS, day(1, 14));
        assert_eq!(store.cheapest_hour(), Some(day(2, 2)));
    }

    #[test]
    fn loop_exits_on_shutdown() {
        let store = PriceStore::new();
        let feed = FakeFeed::ok(vec![entry(crate::utils::truncate_hour(Utc::now()), 0.5)]);
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        drop(tx);

        // Fetches once at startup, then sees the disconnected shutdown channel.
        run_loop(&feed, &store, SETTINGS, &rx);
        assert_eq!(store.len(), 1);
    }
}
