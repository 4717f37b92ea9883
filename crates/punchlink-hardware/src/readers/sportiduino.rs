//! Sportiduino master station.

use bytes::Bytes;
use punchlink_core::{
    DeviceFamily, RawCardRecord,
    constants::sportiduino::{RESP_CARD_DATA, RESP_VERSION},
};
use punchlink_protocol::{
    Response, SportiduinoCodec,
    sportiduino::{Request, check_response, decode_card, is_card_read_error},
};

use super::polled::{PolledProtocol, PolledReader};
use crate::Result;

/// Sportiduino command vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sportiduino;

/// Reader for a Sportiduino master station.
pub type SportiduinoReader<T> = PolledReader<T, Sportiduino>;

impl PolledProtocol for Sportiduino {
    type Codec = SportiduinoCodec;

    const FAMILY: DeviceFamily = DeviceFamily::Sportiduino;

    fn version_request() -> Result<Bytes> {
        Ok(Request::read_version().encode()?)
    }

    fn check_version(response: Response) -> Result<Bytes> {
        Ok(check_response(response, RESP_VERSION)?)
    }

    fn read_request() -> Result<Bytes> {
        Ok(Request::read_card().encode()?)
    }

    fn decode_card(response: Response) -> Result<Option<RawCardRecord>> {
        match check_response(response, RESP_CARD_DATA) {
            Ok(data) => Ok(Some(decode_card(&data)?)),
            // The station answers "card read error" when nothing is on it.
            Err(err) if is_card_read_error(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn beep_request() -> Result<Bytes> {
        Ok(Request::beep_ok().encode()?)
    }
}
