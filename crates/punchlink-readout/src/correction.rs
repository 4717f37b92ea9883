//! 12-hour clock disambiguation.
//!
//! Cards such as the SPORTident card 5 store times of day without AM/PM.
//! A time is placed in the half-day window that opens at the race's zero
//! time `S`: with `d = (P - S) mod 24h`, a time with `d <= 12h` is kept and
//! any other time is moved by twelve hours.
//!
//! | zero time | stored | corrected |
//! |-----------|--------|-----------|
//! | 08:00:00 | 07:00:00 | 19:00:00 |
//! | 08:00:00 | 21:00:05 | 09:00:05 |
//! | 08:00:00 | 08:30:00 | 08:30:00 |
//!
//! A corrected time always lies inside the window, so applying the
//! correction again leaves it unchanged.

use chrono::{NaiveDateTime, NaiveTime};
use punchlink_core::{
    clock::{seconds_of_day, time_from_seconds},
    constants::{DAY_SECS, HALF_DAY_SECS},
};

/// Place `time` in the half-day window starting at `zero_time`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveTime;
/// use punchlink_readout::correction::correct_time;
///
/// let zero = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
/// let seven = NaiveTime::from_hms_opt(7, 0, 0).unwrap();
/// assert_eq!(correct_time(zero, seven), NaiveTime::from_hms_opt(19, 0, 0).unwrap());
/// ```
#[must_use]
pub fn correct_time(zero_time: NaiveTime, time: NaiveTime) -> NaiveTime {
    let zero = seconds_of_day(zero_time);
    let punch = seconds_of_day(time);
    let since_zero = (punch + DAY_SECS - zero) % DAY_SECS;
    if since_zero <= HALF_DAY_SECS {
        time
    } else {
        time_from_seconds(punch + HALF_DAY_SECS)
    }
}

/// [`correct_time`] on a timestamp, keeping its date.
#[must_use]
pub fn correct_timestamp(zero_time: NaiveTime, at: NaiveDateTime) -> NaiveDateTime {
    at.date().and_time(correct_time(zero_time, at.time()))
}
