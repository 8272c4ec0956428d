//! In-memory, time-ordered price cache and cheapest-hour selection.
//!
//! Entries and the scalar decision fields share one `RwLock`. No method
//! performs I/O while holding it.

use crate::models::price::{PriceEntry, PriceLevel};
use crate::utils::{in_span, truncate_hour};
use chrono::{DateTime, Days, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How far back entries are kept, and the span used for level classification.
pub const RETENTION: Duration = Duration::hours(24);

const HIGH_RATIO: f64 = 1.20;
const LOW_RATIO: f64 = 0.90;

#[derive(Debug, Default)]
struct Inner {
    // Keyed by the entry's hour-truncated timestamp, so iteration is chronological.
    entries: BTreeMap<DateTime<Utc>, PriceEntry>,
    cheapest_hour: Option<DateTime<Utc>>,
    cheapest_charge_start: Option<DateTime<Utc>>,
    last_calculated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct PriceStore {
    inner: RwLock<Inner>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave `Inner` half-updated (every mutation is a
    // single map or field operation), so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for the entry's hour.
    pub fn add(&self, entry: PriceEntry) {
        let key = truncate_hour(entry.timestamp);
        self.write().entries.insert(key, entry);
    }

    /// Drop every entry more than 24 hours older than `now`. An entry exactly
    /// 24 hours old is kept. Returns the number of removed entries.
    pub fn clear_old(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - RETENTION;
        let mut inner = self.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.timestamp >= cutoff);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Whether any entry falls on the calendar day after `now`.
    pub fn has_tomorrow_prices(&self, now: DateTime<Utc>) -> bool {
        let Some(tomorrow) = now.date_naive().checked_add_days(Days::new(1)) else {
            return false;
        };
        self.read().entries.values().any(|e| e.timestamp.date_naive() == tomorrow)
    }

    /// Hour with the minimum total among entries in `from..=to`.
    ///
    /// Ties go to the earliest hour. Returns `None` when the window holds no
    /// entries (or is inverted).
    pub fn calculate_cheapest_hour(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if from > to {
            return None;
        }
        let inner = self.read();
        let mut best: Option<&PriceEntry> = None;
        // Ascending iteration plus a strict comparison keeps the earliest of equal totals.
        for entry in inner.entries.range(truncate_hour(from)..=to).map(|(_, e)| e) {
            if entry.timestamp < from || entry.timestamp > to {
                continue;
            }
            match best {
                Some(b) if entry.total >= b.total => {}
                _ if entry.total.is_nan() => {}
                _ => best = Some(entry),
            }
        }
        best.map(|e| e.timestamp)
    }

    /// Entry whose hour `[timestamp, timestamp + 1h)` contains `now`.
    pub fn current_price(&self, now: DateTime<Utc>) -> Option<PriceEntry> {
        let inner = self.read();
        inner
            .entries
            .range(..=truncate_hour(now))
            .next_back()
            .map(|(_, e)| e)
            .filter(|e| in_span(e.timestamp, Duration::hours(1), now))
            .cloned()
    }

    /// Timestamp of the newest stored entry.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.read().entries.values().next_back().map(|e| e.timestamp)
    }

    pub fn set_cheapest_hour(&self, t: DateTime<Utc>) {
        self.write().cheapest_hour = Some(t);
    }

    pub fn cheapest_hour(&self) -> Option<DateTime<Utc>> {
        self.read().cheapest_hour
    }

    pub fn set_cheapest_charge_start(&self, t: DateTime<Utc>) {
        self.write().cheapest_charge_start = Some(t);
    }

    pub fn cheapest_charge_start(&self) -> Option<DateTime<Utc>> {
        self.read().cheapest_charge_start
    }

    pub fn set_last_calculated(&self, t: DateTime<Utc>) {
        self.write().last_calculated = Some(t);
    }

    pub fn last_calculated(&self) -> Option<DateTime<Utc>> {
        self.read().last_calculated
    }

    /// All entries, oldest first.
    pub fn sorted_by_time(&self) -> Vec<PriceEntry> {
        self.read().entries.values().cloned().collect()
    }

    /// Classify `total` against the trailing 24h average of entries in `(t - 24h, t]`.
    ///
    /// Returns the level and `total / average`, or `None` when there are no
    /// entries in the window or the average is zero.
    pub fn classify_level(&self, t: DateTime<Utc>, total: f64) -> Option<(PriceLevel, f64)> {
        let lower = t - RETENTION;
        let inner = self.read();
        let (sum, count) = inner
            .entries
            .values()
            .filter(|e| e.timestamp > lower && e.timestamp <= t)
            .fold((0.0_f64, 0_u32), |(sum, n), e| (sum + e.total, n + 1));
        drop(inner);

        if count == 0 {
            return None;
        }
        let average = sum / f64::from(count);
        if average == 0.0 {
            return None;
        }

        let level = if total >= average * HIGH_RATIO {
            PriceLevel::High
        } else if total <= average * LOW_RATIO {
            PriceLevel::Low
        } else {
            PriceLevel::Normal
        };
        Some((level, total / average))
    }
}
