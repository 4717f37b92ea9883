//! Timestamp decoding shared by the card decoders.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::{ProtocolError, Result};

/// Local wall-clock time for a unix timestamp, as stored by Sportiduino
/// cards and SRPid chips.
///
/// # Errors
/// Returns `ProtocolError::InvalidCardData` if the timestamp is out of range.
pub fn unix_to_local(secs: u32) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(i64::from(secs), 0)
        .map(|utc| utc.with_timezone(&Local).naive_local())
        .ok_or_else(|| ProtocolError::invalid_card(format!("timestamp {secs} out of range")))
}

/// Wall-clock time for a number of seconds after midnight of `date`.
///
/// # Errors
/// Returns `ProtocolError::InvalidCardData` if `secs` is a day or more.
pub fn seconds_on(date: NaiveDate, secs: u32) -> Result<NaiveDateTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .map(|time| date.and_time(time))
        .ok_or_else(|| ProtocolError::invalid_card(format!("{secs} s is not a time of day")))
}

/// Decode one packed BCD byte (`0x59` → 59).
///
/// # Errors
/// Returns `ProtocolError::InvalidCardData` if either nibble is above 9.
pub fn bcd(byte: u8) -> Result<u32> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        return Err(ProtocolError::invalid_card(format!(
            "{byte:#04x} is not a BCD digit pair"
        )));
    }
    Ok(u32::from(hi) * 10 + u32::from(lo))
}
