//! SPORTident extended protocol.
//!
//! ```text
//! FF  STX  CMD  LEN  DATA...  CRC_HI  CRC_LO  ETX
//! ^^ wake-up, outgoing only      CRC-16 over CMD LEN DATA
//! ```
//!
//! Stations in direct mode push an event frame whenever a card is inserted
//! (`0xE5`, `0xE6`, `0xE8`) or removed (`0xE7`). Only SI card 5 is read
//! out; its memory dump is decoded by [`decode_si5`].

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDate;
use tokio_util::codec::{Decoder, Encoder};

use punchlink_core::{
    CardNumber, CardType, Punch, RawCardRecord,
    constants::sportident::{
        CMD_READ_SI5, CMD_SET_MS, ETX, EVT_CARD_REMOVED, EVT_SI5_DETECTED, EVT_SI6_DETECTED,
        EVT_SI8_DETECTED, MS_DIRECT, NO_TIME, SI5_CN_OFFSET, SI5_FINISH_OFFSET,
        SI5_MAX_PUNCHES, SI5_MEMORY_LEN, SI5_PUNCH_COUNT_OFFSET, SI5_PUNCH_LEN,
        SI5_PUNCHES_OFFSET, SI5_SERIES_OFFSET, SI5_START_OFFSET, STATION_PREFIX_LEN, STX,
        WAKEUP,
    },
};

use crate::{
    ProtocolError, Result,
    checksum::crc16,
    frame::{FrameLayout, RawFrame, Response},
    stream_parser::StreamParser,
    time::seconds_on,
};

/// Punch slots per 16-byte block of SI card 5 memory. The first byte of
/// each block belongs to an untimed punch and is skipped.
const SI5_PUNCHES_PER_BLOCK: usize = 5;
const SI5_BLOCK_LEN: usize = 16;

/// A command sent to the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cmd: u8,
    pub data: Bytes,
}

impl Command {
    pub fn new(cmd: u8, data: impl Into<Bytes>) -> Self {
        Command {
            cmd,
            data: data.into(),
        }
    }

    /// Put the station in direct mode; used as the connect handshake.
    pub fn set_direct_mode() -> Self {
        Self::new(CMD_SET_MS, vec![MS_DIRECT])
    }

    pub fn read_si5() -> Self {
        Self::new(CMD_READ_SI5, Bytes::new())
    }

    /// Wire bytes, wake-up byte included.
    ///
    /// # Errors
    /// Returns `ProtocolError::PayloadTooLong` if the data exceeds 255 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use punchlink_protocol::sportident::Command;
    ///
    /// let bytes = Command::set_direct_mode().encode().unwrap();
    /// assert_eq!(&bytes[..], &[0xFF, 0x02, 0xF0, 0x01, 0x4D, 0x6D, 0x0A, 0x03]);
    /// ```
    pub fn encode(&self) -> Result<Bytes> {
        let frame = encode_frame(self.cmd, &self.data)?;
        let mut buf = BytesMut::with_capacity(1 + frame.len());
        buf.put_u8(WAKEUP);
        buf.put_slice(&frame);
        Ok(buf.freeze())
    }
}

/// Frame without the wake-up byte, as a station sends it.
///
/// # Errors
/// Returns `ProtocolError::PayloadTooLong` if `data` exceeds 255 bytes.
pub fn encode_frame(cmd: u8, data: &[u8]) -> Result<Bytes> {
    let len = u8::try_from(data.len()).map_err(|_| ProtocolError::PayloadTooLong {
        len: data.len(),
        max: usize::from(u8::MAX),
    })?;
    let mut buf = BytesMut::with_capacity(6 + data.len());
    buf.put_u8(STX);
    buf.put_u8(cmd);
    buf.put_u8(len);
    buf.put_slice(data);
    let crc = crc16(&buf[1..]);
    buf.put_u16(crc);
    buf.put_u8(ETX);
    Ok(buf.freeze())
}

/// Unsolicited station event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEvent {
    CardInserted(CardType),
    CardRemoved,
}

impl StationEvent {
    /// Interpret a response as a station event, if it is one.
    pub fn from_response(response: &Response) -> Option<Self> {
        match response.code {
            EVT_SI5_DETECTED => Some(StationEvent::CardInserted(CardType::Si5)),
            EVT_SI6_DETECTED => Some(StationEvent::CardInserted(CardType::Si6)),
            EVT_SI8_DETECTED => Some(StationEvent::CardInserted(CardType::Si8)),
            EVT_CARD_REMOVED => Some(StationEvent::CardRemoved),
            _ => None,
        }
    }
}

/// Card memory from a `0xB1` response, without the station number prefix.
///
/// # Errors
/// Returns `ProtocolError::Truncated` if the response is too short.
pub fn si5_memory(data: &[u8]) -> Result<&[u8]> {
    let needed = STATION_PREFIX_LEN + SI5_MEMORY_LEN;
    if data.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            actual: data.len(),
        });
    }
    Ok(&data[STATION_PREFIX_LEN..needed])
}

fn half_day_seconds(memory: &[u8], offset: usize) -> Option<u32> {
    let raw = u16::from_be_bytes([memory[offset], memory[offset + 1]]);
    (raw != NO_TIME).then_some(u32::from(raw))
}

/// Decode SI card 5 memory.
///
/// Times on this card are seconds within a 12-hour half day with no AM/PM
/// information. They are placed on `date` as stored; resolving the half day
/// against the race zero time happens during normalization.
///
/// # Errors
/// Returns `ProtocolError::Truncated` for short memory and
/// `ProtocolError::InvalidCardData` for a zero card number or an
/// impossible time value.
pub fn decode_si5(memory: &[u8], date: NaiveDate) -> Result<RawCardRecord> {
    if memory.len() < SI5_MEMORY_LEN {
        return Err(ProtocolError::Truncated {
            needed: SI5_MEMORY_LEN,
            actual: memory.len(),
        });
    }

    let mut number = u32::from(u16::from_be_bytes([
        memory[SI5_CN_OFFSET],
        memory[SI5_CN_OFFSET + 1],
    ]));
    let series = u32::from(memory[SI5_SERIES_OFFSET]);
    if series > 1 {
        number += series * 100_000;
    }
    let card_number =
        CardNumber::new(number).map_err(|e| ProtocolError::invalid_card(e.to_string()))?;
    let mut record = RawCardRecord::new(card_number, CardType::Si5);

    if let Some(secs) = half_day_seconds(memory, SI5_START_OFFSET) {
        record.start_time = Some(seconds_on(date, secs)?);
    }
    if let Some(secs) = half_day_seconds(memory, SI5_FINISH_OFFSET) {
        record.finish_time = Some(seconds_on(date, secs)?);
    }

    let count = usize::from(memory[SI5_PUNCH_COUNT_OFFSET].saturating_sub(1)).min(SI5_MAX_PUNCHES);
    for i in 0..count {
        let block = i / SI5_PUNCHES_PER_BLOCK;
        let slot = i % SI5_PUNCHES_PER_BLOCK;
        let offset = SI5_PUNCHES_OFFSET + block * SI5_BLOCK_LEN + 1 + slot * SI5_PUNCH_LEN;
        let Some(secs) = half_day_seconds(memory, offset + 1) else {
            continue;
        };
        let station = u16::from(memory[offset]);
        record.punches.push(
            Punch::new(station, seconds_on(date, secs)?)
                .with_raw(&memory[offset..offset + SI5_PUNCH_LEN]),
        );
    }

    Ok(record)
}

/// Codec for the SPORTident extended protocol.
#[derive(Debug)]
pub struct SportidentCodec {
    parser: StreamParser,
}

impl SportidentCodec {
    pub fn new() -> Self {
        Self {
            parser: StreamParser::new(FrameLayout::SPORTIDENT),
        }
    }

    pub fn reset(&mut self) {
        self.parser.clear();
    }

    fn verify(frame: RawFrame) -> Result<Response> {
        let &[crc_hi, crc_lo, etx] = &frame.trailer[..] else {
            return Err(ProtocolError::InvalidFrame(format!(
                "trailer of {} bytes",
                frame.trailer.len()
            )));
        };
        if etx != ETX {
            return Err(ProtocolError::InvalidFrame(format!(
                "expected ETX, got {etx:#04x}"
            )));
        }
        let expected = crc16(&frame.checked_bytes());
        let actual = u16::from_be_bytes([crc_hi, crc_lo]);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }
        Ok(Response::new(frame.code, frame.data))
    }
}

impl Default for SportidentCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SportidentCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            self.parser.feed(src);
            src.clear();
        }

        self.parser.next_frame().map(Self::verify).transpose()
    }
}

impl Encoder<Command> for SportidentCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item.encode()?);
        Ok(())
    }
}
