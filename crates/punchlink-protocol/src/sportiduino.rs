//! Sportiduino master station protocol.
//!
//! Requests and responses share one frame format:
//!
//! ```text
//! 0xFE  CODE  LEN  DATA(<= 28)  CS        CS = (CODE + LEN + sum(DATA)) mod 256
//! ```
//!
//! A response longer than 28 bytes is split into continuation fragments.
//! A fragment carries exactly 28 bytes and announces its index `i` as
//! `LEN = 0x1E + i`; the final frame has an ordinary `LEN`:
//!
//! ```text
//! FE 63 1E <28 bytes> CS      fragment 0
//! FE 63 1F <28 bytes> CS      fragment 1
//! FE 63 0E <14 bytes> CS      last frame
//! ```
//!
//! [`SportiduinoCodec`] reassembles fragments before yielding a
//! [`Response`], so callers only ever see complete payloads.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use punchlink_protocol::sportiduino::{Request, SportiduinoCodec, fragment_response};
//!
//! let mut codec = SportiduinoCodec::new();
//!
//! let mut out = BytesMut::new();
//! codec.encode(Request::read_version(), &mut out).unwrap();
//! assert_eq!(&out[..], &[0xFE, 0x46, 0x00, 0x46]);
//!
//! let payload: Vec<u8> = (0..40).collect();
//! let mut wire = BytesMut::new();
//! for frame in fragment_response(0x63, &payload) {
//!     wire.extend_from_slice(&frame);
//! }
//! let response = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(&response.data[..], &payload[..]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use punchlink_core::{
    CardNumber, CardType, Punch, RawCardRecord,
    constants::sportiduino::{
        CARD_HEADER_LEN, CMD_BEEP_ERROR, CMD_BEEP_OK, CMD_READ_CARD, CMD_READ_VERSION,
        ERR_COM, ERR_READ_CARD, ERR_READ_EEPROM, ERR_WRITE_CARD, FINISH_STATION,
        FRAGMENT_OFFSET, MAX_DATA_LEN, PUNCH_RECORD_LEN, RESP_ERROR, START_BYTE, START_STATION,
    },
};

use crate::{
    ProtocolError, Result,
    checksum::sum8,
    frame::{FrameLayout, RawFrame, Response},
    stream_parser::StreamParser,
    time::unix_to_local,
};

/// A command sent to the master station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub code: u8,
    pub params: Bytes,
}

impl Request {
    pub fn new(code: u8) -> Self {
        Request {
            code,
            params: Bytes::new(),
        }
    }

    pub fn with_params(code: u8, params: impl Into<Bytes>) -> Self {
        Request {
            code,
            params: params.into(),
        }
    }

    pub fn read_version() -> Self {
        Self::new(CMD_READ_VERSION)
    }

    pub fn read_card() -> Self {
        Self::new(CMD_READ_CARD)
    }

    pub fn beep_ok() -> Self {
        Self::new(CMD_BEEP_OK)
    }

    pub fn beep_error() -> Self {
        Self::new(CMD_BEEP_ERROR)
    }

    /// Beep commands are fire-and-forget; the station sends nothing back.
    pub fn expects_response(&self) -> bool {
        !matches!(self.code, CMD_BEEP_OK | CMD_BEEP_ERROR)
    }

    /// Wire bytes of this request.
    ///
    /// # Errors
    /// Returns `ProtocolError::PayloadTooLong` if the parameters do not fit in
    /// one frame. Requests are never fragmented.
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self.code, &self.params)
    }
}

/// Build one non-fragmented frame.
///
/// # Errors
/// Returns `ProtocolError::PayloadTooLong` if `data` exceeds 28 bytes.
pub fn encode_frame(code: u8, data: &[u8]) -> Result<Bytes> {
    if data.len() > MAX_DATA_LEN {
        return Err(ProtocolError::PayloadTooLong {
            len: data.len(),
            max: MAX_DATA_LEN,
        });
    }
    // MAX_DATA_LEN fits in a byte
    Ok(build_frame(code, data.len() as u8, data))
}

/// Split a response payload into wire frames the way a station sends it.
///
/// Payloads up to 28 bytes produce a single frame.
pub fn fragment_response(code: u8, data: &[u8]) -> Vec<Bytes> {
    if data.len() <= MAX_DATA_LEN {
        return vec![build_frame(code, data.len() as u8, data)];
    }

    let chunks: Vec<&[u8]> = data.chunks(MAX_DATA_LEN).collect();
    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let len = if i == last {
                chunk.len() as u8
            } else {
                FRAGMENT_OFFSET.saturating_add(i as u8)
            };
            build_frame(code, len, chunk)
        })
        .collect()
}

fn build_frame(code: u8, len: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.put_u8(START_BYTE);
    buf.put_u8(code);
    buf.put_u8(len);
    buf.put_slice(data);
    let cs = sum8(&buf[1..]);
    buf.put_u8(cs);
    buf.freeze()
}

/// Human-readable meaning of a station error code.
pub fn error_message(code: u8) -> &'static str {
    match code {
        ERR_COM => "COM error",
        ERR_WRITE_CARD => "card write error",
        ERR_READ_CARD => "card read error",
        ERR_READ_EEPROM => "EEPROM read error",
        _ => "unknown error",
    }
}

/// Check a response against the code the request expects.
///
/// # Errors
/// - `ProtocolError::DeviceError` for an error response (`0x78`)
/// - `ProtocolError::UnexpectedResponse` for any other unexpected code
pub fn check_response(response: Response, expected: u8) -> Result<Bytes> {
    match response.code {
        code if code == expected => Ok(response.data),
        RESP_ERROR => {
            let code = response.data.first().copied().unwrap_or_default();
            Err(ProtocolError::DeviceError {
                code,
                message: error_message(code),
            })
        }
        actual => Err(ProtocolError::UnexpectedResponse { expected, actual }),
    }
}

/// Returns `true` if the error is the station's "card read error", which it
/// also reports when no card is on the reader.
pub fn is_card_read_error(err: &ProtocolError) -> bool {
    matches!(err, ProtocolError::DeviceError { code, .. } if *code == ERR_READ_CARD)
}

/// Decode the payload of a card data response (`0x63`).
///
/// ```text
/// CN_HI CN_LO  PAGE6[4]  PAGE7[4]  (STATION  UNIX_SECS[4])*
/// ```
///
/// Station 240 holds the start time and 245 the finish time; every other
/// record becomes a punch, in card order.
///
/// # Errors
/// Returns `ProtocolError::InvalidCardData` if the length is not
/// `10 + 5n`, the card number is zero, or a timestamp is out of range.
pub fn decode_card(data: &[u8]) -> Result<RawCardRecord> {
    if data.len() < CARD_HEADER_LEN || (data.len() - CARD_HEADER_LEN) % PUNCH_RECORD_LEN != 0 {
        return Err(ProtocolError::invalid_card(format!(
            "card payload of {} bytes is not {CARD_HEADER_LEN} + {PUNCH_RECORD_LEN}n",
            data.len()
        )));
    }

    let number = u32::from(u16::from_be_bytes([data[0], data[1]]));
    let card_number = CardNumber::new(number)
        .map_err(|e| ProtocolError::invalid_card(e.to_string()))?;
    let mut record = RawCardRecord::new(card_number, CardType::Sportiduino);

    for chunk in data[CARD_HEADER_LEN..].chunks_exact(PUNCH_RECORD_LEN) {
        let station = chunk[0];
        let secs = u32::from_be_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]);
        let time = unix_to_local(secs)?;
        match station {
            START_STATION => record.start_time = Some(time),
            FINISH_STATION => record.finish_time = Some(time),
            _ => record
                .punches
                .push(Punch::new(u16::from(station), time).with_raw(chunk)),
        }
    }

    Ok(record)
}

#[derive(Debug)]
struct Reassembly {
    code: u8,
    next: u8,
    data: BytesMut,
}

/// Codec for the Sportiduino serial protocol.
///
/// Decodes verified, reassembled [`Response`]s and encodes [`Request`]s.
#[derive(Debug)]
pub struct SportiduinoCodec {
    parser: StreamParser,
    pending: Option<Reassembly>,
}

impl SportiduinoCodec {
    pub fn new() -> Self {
        Self {
            parser: StreamParser::new(FrameLayout::SPORTIDUINO),
            pending: None,
        }
    }

    /// Forget buffered bytes and any half-assembled response.
    pub fn reset(&mut self) {
        self.parser.clear();
        self.pending = None;
    }

    /// Returns `true` while fragments of a response have been received but
    /// its last frame has not.
    pub fn is_reassembling(&self) -> bool {
        self.pending.is_some() || self.parser.is_mid_frame()
    }

    fn accept(&mut self, frame: RawFrame) -> Result<Option<Response>> {
        let expected = sum8(&frame.checked_bytes());
        let actual = frame.trailer.first().copied().unwrap_or_default();
        if expected != actual {
            self.pending = None;
            return Err(ProtocolError::checksum8(expected, actual));
        }

        match (frame.fragment, self.pending.take()) {
            (Some(index), None) => {
                if index != 0 {
                    return Err(ProtocolError::FragmentOutOfOrder {
                        expected: 0,
                        actual: index,
                    });
                }
                self.pending = Some(Reassembly {
                    code: frame.code,
                    next: 1,
                    data: BytesMut::from(&frame.data[..]),
                });
                Ok(None)
            }
            (Some(index), Some(mut reassembly)) => {
                if frame.code != reassembly.code {
                    return Err(ProtocolError::FragmentCodeMismatch {
                        expected: reassembly.code,
                        actual: frame.code,
                    });
                }
                if index != reassembly.next {
                    return Err(ProtocolError::FragmentOutOfOrder {
                        expected: reassembly.next,
                        actual: index,
                    });
                }
                reassembly.data.extend_from_slice(&frame.data);
                reassembly.next = reassembly.next.saturating_add(1);
                self.pending = Some(reassembly);
                Ok(None)
            }
            (None, Some(mut reassembly)) => {
                if frame.code != reassembly.code {
                    return Err(ProtocolError::FragmentCodeMismatch {
                        expected: reassembly.code,
                        actual: frame.code,
                    });
                }
                reassembly.data.extend_from_slice(&frame.data);
                Ok(Some(Response::new(frame.code, reassembly.data.freeze())))
            }
            (None, None) => Ok(Some(Response::new(frame.code, frame.data))),
        }
    }
}

impl Default for SportiduinoCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SportiduinoCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            self.parser.feed(src);
            src.clear();
        }

        while let Some(frame) = self.parser.next_frame() {
            if let Some(response) = self.accept(frame)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

impl Encoder<Request> for SportiduinoCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<()> {
        let bytes = item.encode()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
