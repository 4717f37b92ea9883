//! Race clock collaborator.
//!
//! The race store owns the zero time and knows which calendar day a punch
//! belongs to. The readout pipeline only needs those two answers, so it
//! talks to the store through [`RaceClock`].

use crate::constants::{DAY_SECS, DEFAULT_ZERO_TIME};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Source of the race's zero time and day numbering.
pub trait RaceClock: Send + Sync {
    /// Nominal race start, used to disambiguate 12-hour clock values.
    fn zero_time(&self) -> NaiveTime;

    /// Race day a wall-clock instant belongs to, counted from the race's
    /// zero-time epoch.
    fn day_offset(&self, at: NaiveDateTime) -> i32;
}

/// [`RaceClock`] for a race with a fixed first day and zero time.
///
/// Day offsets are calendar days since `race_date`.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use punchlink_core::{FixedRaceClock, RaceClock};
///
/// let day1 = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
/// let clock = FixedRaceClock::new(day1, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
///
/// let day2 = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap().and_hms_opt(9, 0, 0).unwrap();
/// assert_eq!(clock.day_offset(day2), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRaceClock {
    race_date: NaiveDate,
    zero_time: NaiveTime,
}

impl FixedRaceClock {
    #[must_use]
    pub fn new(race_date: NaiveDate, zero_time: NaiveTime) -> Self {
        FixedRaceClock {
            race_date,
            zero_time,
        }
    }

    /// Race starting today at the default zero time (08:00:00).
    #[must_use]
    pub fn today() -> Self {
        FixedRaceClock::new(chrono::Local::now().date_naive(), default_zero_time())
    }

    #[must_use]
    pub fn race_date(&self) -> NaiveDate {
        self.race_date
    }
}

impl RaceClock for FixedRaceClock {
    fn zero_time(&self) -> NaiveTime {
        self.zero_time
    }

    fn day_offset(&self, at: NaiveDateTime) -> i32 {
        let days = at.date().signed_duration_since(self.race_date).num_days();
        i32::try_from(days).unwrap_or(if days < 0 { i32::MIN } else { i32::MAX })
    }
}

/// The default zero time, 08:00:00.
#[must_use]
pub fn default_zero_time() -> NaiveTime {
    let (h, m, s) = DEFAULT_ZERO_TIME;
    NaiveTime::from_hms_opt(h, m, s).unwrap_or(NaiveTime::MIN)
}

/// Seconds elapsed since midnight.
#[inline]
#[must_use]
pub fn seconds_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}

/// Time of day for a second count, wrapped into one day.
#[inline]
#[must_use]
pub fn time_from_seconds(secs: u32) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(secs % DAY_SECS, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[rstest]
    #[case(14, 0)]
    #[case(15, 1)]
    #[case(17, 3)]
    #[case(13, -1)]
    fn test_day_offset(#[case] day: u32, #[case] expected: i32) {
        let clock = FixedRaceClock::new(date(14), default_zero_time());
        let at = date(day).and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(clock.day_offset(at), expected);
    }

    #[test]
    fn test_default_zero_time() {
        assert_eq!(default_zero_time(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    }

    #[test]
    fn test_seconds_round_trip() {
        let t = NaiveTime::from_hms_opt(21, 0, 5).unwrap();
        assert_eq!(seconds_of_day(t), 75_605);
        assert_eq!(time_from_seconds(75_605), t);
    }

    #[test]
    fn test_time_from_seconds_wraps() {
        assert_eq!(time_from_seconds(DAY_SECS + 60), NaiveTime::from_hms_opt(0, 1, 0).unwrap());
    }
}
