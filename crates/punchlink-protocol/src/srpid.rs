//! SRPid chip reader protocol.
//!
//! Requests are always ten bytes; responses are length-prefixed:
//!
//! ```text
//! request:  C1 CODE 00 00 00 00 00 00 CE CS     CS = sum(CODE .. CE) mod 256
//! response: EC CODE LEN DATA CS                 CS = sum(CODE LEN DATA) mod 256
//! ```

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use punchlink_core::{
    CardNumber, CardType, Punch, RawCardRecord,
    constants::srpid::{
        CHIP_NUMBER_OFFSET, CMD_BEEP_OK, ERR_COM, ERR_READ_CHIP, ERR_WRITE_CHIP,
        FINISH_STATION, PUNCH_RECORD_LEN, PUNCHES_OFFSET, REQUEST_END, REQUEST_LEN,
        REQUEST_PADDING, REQUEST_START, RESP_ERROR, RESPONSE_START, START_STATION,
    },
};

use crate::{
    ProtocolError, Result,
    checksum::sum8,
    frame::{FrameLayout, RawFrame, Response},
    stream_parser::StreamParser,
    time::unix_to_local,
};

/// Wire bytes of a request for `code`.
///
/// # Examples
///
/// ```
/// use punchlink_protocol::srpid::encode_request;
///
/// let read_chip = encode_request(0x2F);
/// assert_eq!(read_chip, [0xC1, 0x2F, 0, 0, 0, 0, 0, 0, 0xCE, 0xFD]);
/// ```
#[must_use]
pub fn encode_request(code: u8) -> [u8; REQUEST_LEN] {
    let mut buf = [0u8; REQUEST_LEN];
    buf[0] = REQUEST_START;
    buf[1] = code;
    buf[2 + REQUEST_PADDING] = REQUEST_END;
    buf[REQUEST_LEN - 1] = sum8(&buf[1..REQUEST_LEN - 1]);
    buf
}

/// Build a response frame as the reader sends it. Used by mocks and tests.
///
/// # Errors
/// Returns `ProtocolError::PayloadTooLong` if `data` exceeds 255 bytes.
pub fn encode_response(code: u8, data: &[u8]) -> Result<Bytes> {
    let len = u8::try_from(data.len()).map_err(|_| ProtocolError::PayloadTooLong {
        len: data.len(),
        max: usize::from(u8::MAX),
    })?;
    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.extend_from_slice(&[RESPONSE_START, code, len]);
    buf.extend_from_slice(data);
    let cs = sum8(&buf[1..]);
    buf.extend_from_slice(&[cs]);
    Ok(buf.freeze())
}

/// Beep is fire-and-forget; every other command is answered.
pub fn expects_response(code: u8) -> bool {
    code != CMD_BEEP_OK
}

pub fn error_message(code: u8) -> &'static str {
    match code {
        ERR_COM => "COM error",
        ERR_WRITE_CHIP => "chip write error",
        ERR_READ_CHIP => "chip read error",
        _ => "unknown error",
    }
}

/// Check a response against the code the request expects.
///
/// # Errors
/// - `ProtocolError::DeviceError` for an error response (`0x76`)
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

/// Decode the payload of a chip data response (`0x70`).
///
/// ```text
/// SERIAL[4]  CHIP_HI CHIP_LO  RESERVED[8]  (STATION  UNIX_SECS[4])*
/// ```
///
/// Station 241 is the start and 242 the finish.
///
/// # Errors
/// Returns `ProtocolError::InvalidCardData` for a malformed payload.
pub fn decode_chip(data: &[u8]) -> Result<RawCardRecord> {
    if data.len() < PUNCHES_OFFSET || (data.len() - PUNCHES_OFFSET) % PUNCH_RECORD_LEN != 0 {
        return Err(ProtocolError::invalid_card(format!(
            "chip payload of {} bytes is not {PUNCHES_OFFSET} + {PUNCH_RECORD_LEN}n",
            data.len()
        )));
    }

    let number = u32::from(u16::from_be_bytes([
        data[CHIP_NUMBER_OFFSET],
        data[CHIP_NUMBER_OFFSET + 1],
    ]));
    let card_number =
        CardNumber::new(number).map_err(|e| ProtocolError::invalid_card(e.to_string()))?;
    let mut record = RawCardRecord::new(card_number, CardType::Srpid)
        .with_chip_id(&data[..CHIP_NUMBER_OFFSET]);

    for chunk in data[PUNCHES_OFFSET..].chunks_exact(PUNCH_RECORD_LEN) {
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

/// Codec for the SRPid serial protocol.
///
/// Encodes command codes into fixed-size requests and decodes verified
/// [`Response`]s.
#[derive(Debug)]
pub struct SrpidCodec {
    parser: StreamParser,
}

impl SrpidCodec {
    pub fn new() -> Self {
        Self {
            parser: StreamParser::new(FrameLayout::SRPID),
        }
    }

    pub fn reset(&mut self) {
        self.parser.clear();
    }

    fn verify(frame: RawFrame) -> Result<Response> {
        let expected = sum8(&frame.checked_bytes());
        let actual = frame.trailer.first().copied().unwrap_or_default();
        if expected != actual {
            return Err(ProtocolError::checksum8(expected, actual));
        }
        Ok(Response::new(frame.code, frame.data))
    }
}

impl Default for SrpidCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SrpidCodec {
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

impl Encoder<u8> for SrpidCodec {
    type Error = ProtocolError;

    fn encode(&mut self, code: u8, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&encode_request(code));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchlink_core::constants::srpid::{CMD_READ_VERSION, RESP_CHIP_DATA, RESP_VERSION};

    fn chip_payload(number: u16, records: &[(u8, u32)]) -> Vec<u8> {
        let mut data = vec![0xDE, 0xAD, 0xBE, 0xEF];
        data.extend_from_slice(&number.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        for (station, secs) in records {
            data.push(*station);
            data.extend_from_slice(&secs.to_be_bytes());
        }
        data
    }

    #[test]
    fn test_request_checksum_covers_code_padding_and_end() {
        let version = encode_request(CMD_READ_VERSION);
        assert_eq!(version[9], 0x32u8.wrapping_add(0xCE));
        assert_eq!(encode_request(CMD_BEEP_OK)[9], 0x04);
    }

    #[test]
    fn test_encoder_writes_full_request() {
        let mut codec = SrpidCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(0x2F, &mut dst).unwrap();
        assert_eq!(dst.len(), REQUEST_LEN);
        assert_eq!(dst[0], REQUEST_START);
    }

    #[test]
    fn test_decode_response() {
        let mut buf = BytesMut::from(&encode_response(RESP_VERSION, &[0x05]).unwrap()[..]);
        let response = SrpidCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(response, Response::new(RESP_VERSION, vec![0x05]));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut bytes = encode_response(RESP_VERSION, &[0x05]).unwrap().to_vec();
        bytes[3] = 0x06;
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            SrpidCodec::new().decode(&mut buf),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_error_response() {
        let err = check_response(Response::new(RESP_ERROR, vec![0x03]), RESP_CHIP_DATA).unwrap_err();
        assert!(matches!(err, ProtocolError::DeviceError { code: 0x03, message: "chip read error" }));
    }

    #[test]
    fn test_decode_chip() {
        let base = 1_718_355_600u32;
        let data = chip_payload(77, &[(241, base), (40, base + 30), (41, base + 90), (242, base + 100)]);

        let record = decode_chip(&data).unwrap();
        assert_eq!(record.card_number.as_u32(), 77);
        assert_eq!(record.chip_id.as_deref(), Some(&[0xDE, 0xAD, 0xBE, 0xEF][..]));
        assert_eq!(record.start_time, Some(unix_to_local(base).unwrap()));
        assert_eq!(record.finish_time, Some(unix_to_local(base + 100).unwrap()));
        let stations: Vec<u16> = record.punches.iter().map(|p| p.station).collect();
        assert_eq!(stations, vec![40, 41]);
    }

    #[test]
    fn test_decode_chip_rejects_short_payload() {
        assert!(decode_chip(&[0; 10]).is_err());
        assert!(decode_chip(&[0; 16]).is_err());
    }

    #[test]
    fn test_beep_has_no_response() {
        assert!(!expects_response(CMD_BEEP_OK));
        assert!(expects_response(0x2F));
    }
}
