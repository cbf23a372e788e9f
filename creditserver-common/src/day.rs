//! UTC day-key handling.
//!
//! Quota refresh operates on whole UTC days, keyed by an 8-digit
//! `YYYYMMDD` integer. Sub-day granularity intentionally does not exist.

use chrono::{DateTime, Datelike, Days, Utc};

/// The day key for the given instant, e.g. `20201230`.
pub fn day_key_at(t: DateTime<Utc>) -> i32 {
    t.year() * 10_000 + t.month() as i32 * 100 + t.day() as i32
}

/// The start of the next UTC day after the given instant, as epoch seconds.
///
/// Used by callers to fill in rate-limit reset headers.
pub fn next_day_epoch(t: DateTime<Utc>) -> i64 {
    t.date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("next UTC midnight")
        .and_utc()
        .timestamp()
}

/// A source of "now", injected into the services so tests can pin the day.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Today's `YYYYMMDD` day key.
    fn today(&self) -> i32 {
        day_key_at(self.now())
    }

    /// Next UTC midnight as epoch seconds.
    fn next_day_epoch(&self) -> i64 {
        next_day_epoch(self.now())
    }
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn dec_30_2020() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 12, 30, 13, 37, 42).unwrap()
    }

    #[test]
    fn day_key_is_eight_digit_utc_date() {
        assert_eq!(day_key_at(dec_30_2020()), 20201230);
    }

    #[test]
    fn next_day_epoch_is_next_utc_midnight() {
        let expected = 1609372800; // 2020-12-31T00:00:00Z
        assert_eq!(next_day_epoch(dec_30_2020()), expected);
    }

    #[test]
    fn next_day_epoch_crosses_year_boundary() {
        let t = Utc.with_ymd_and_hms(2020, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(next_day_epoch(t), 1609459200); // 2021-01-01T00:00:00Z
    }

    #[test]
    fn fixed_clock_reports_pinned_day() {
        let clock = FixedClock(dec_30_2020());
        assert_eq!(clock.today(), 20201230);
        assert_eq!(clock.next_day_epoch(), 1609372800);
    }
}
