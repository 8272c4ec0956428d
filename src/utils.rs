//! Time window helpers shared by the price store and the control loops.
//!
//! All calendar arithmetic is done in UTC.

use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveTime, Utc};
use std::time::Duration as StdDuration;

/// Floor an instant to the start of its hour.
pub fn truncate_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    // Truncation by one hour cannot overflow for any representable UTC instant.
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

pub fn is_same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    truncate_hour(a) == truncate_hour(b)
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Whether `check` lies in the half-open span `[start, start + len)`.
pub fn in_span(start: DateTime<Utc>, len: Duration, check: DateTime<Utc>) -> bool {
    check >= start && check < start + len
}

/// Inclusive bounds of the evening-to-morning lookahead band.
///
/// The band is `[today start_hour:00, tomorrow end_hour:00)`. Because stored
/// entries are hour-aligned the exclusive end is expressed as the last hour
/// that still belongs to the band, so the result can be fed straight into
/// `PriceStore::calculate_cheapest_hour`.
pub fn lookahead_window(now: DateTime<Utc>, start_hour: u32, end_hour: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = start_of_day(now.date_naive());
    let from = today + Duration::hours(i64::from(start_hour));
    let to = today + Duration::days(1) + Duration::hours(i64::from(end_hour)) - Duration::hours(1);
    (from, to)
}

/// Time until the next boundary that is a whole multiple of `align_minutes`
/// past midnight. A call made exactly on a boundary waits a full step.
pub fn next_fetch_delay(now: DateTime<Utc>, align_minutes: u32) -> StdDuration {
    let step = Duration::minutes(i64::from(align_minutes.max(1)));
    let floor = now.duration_trunc(step).unwrap_or(now);
    let next = floor + step;
    (next - now).to_std().unwrap_or(StdDuration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncates_to_hour() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 59, 59).unwrap();
        assert_eq!(truncate_hour(t), Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
        assert!(is_same_hour(t, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 1).unwrap()));
        assert!(!is_same_hour(t, Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()));
    }

    #[test]
    fn span_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        assert!(in_span(start, Duration::hours(1), start));
        assert!(in_span(start, Duration::hours(1), start + Duration::minutes(59)));
        assert!(!in_span(start, Duration::hours(1), start + Duration::hours(1)));
        assert!(!in_span(start, Duration::hours(1), start - Duration::seconds(1)));
    }

    #[test]
    fn lookahead_window_spans_evening_to_morning() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 5, 0).unwrap();
        let (from, to) = lookahead_window(now, 18, 9);
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn fetch_delay_lands_on_next_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 13, 20, 30).unwrap();
        assert_eq!(next_fetch_delay(now, 60), StdDuration::from_secs(39 * 60 + 30));
        assert_eq!(next_fetch_delay(now, 30), StdDuration::from_secs(9 * 60 + 30));

        let on_boundary = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        assert_eq!(next_fetch_delay(on_boundary, 60), StdDuration::from_secs(3600));
    }
}
