//! SRPid chip reader.

use bytes::Bytes;
use punchlink_core::{
    DeviceFamily, RawCardRecord,
    constants::srpid::{
        CMD_BEEP_OK, CMD_READ_CHIP, CMD_READ_VERSION, ERR_READ_CHIP, RESP_CHIP_DATA, RESP_VERSION,
    },
};
use punchlink_protocol::{
    ProtocolError, Response, SrpidCodec,
    srpid::{check_response, decode_chip, encode_request},
};

use super::polled::{PolledProtocol, PolledReader};
use crate::Result;

/// SRPid command vocabulary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Srpid;

/// Reader for an SRPid chip station.
pub type SrpidReader<T> = PolledReader<T, Srpid>;

impl PolledProtocol for Srpid {
    type Codec = SrpidCodec;

    const FAMILY: DeviceFamily = DeviceFamily::Srpid;

    fn version_request() -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&encode_request(CMD_READ_VERSION)))
    }

    fn check_version(response: Response) -> Result<Bytes> {
        Ok(check_response(response, RESP_VERSION)?)
    }

    fn read_request() -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&encode_request(CMD_READ_CHIP)))
    }

    fn decode_card(response: Response) -> Result<Option<RawCardRecord>> {
        match check_response(response, RESP_CHIP_DATA) {
            Ok(data) => Ok(Some(decode_chip(&data)?)),
            Err(ProtocolError::DeviceError {
                code: ERR_READ_CHIP,
                ..
            }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn beep_request() -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(&encode_request(CMD_BEEP_OK)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        HardwareError, PunchReader,
        config::ReaderConfig,
        mock::{MockTransport, MockTransportHandle},
    };
    use punchlink_core::constants::srpid::{ERR_COM, RESP_ERROR};
    use punchlink_protocol::srpid::encode_response;
    use std::time::Duration;

    fn chip(number: u16, records: &[(u8, u32)]) -> Vec<u8> {
        let mut data = vec![0x01, 0x02, 0x03, 0x04];
        data.extend_from_slice(&number.to_be_bytes());
        data.extend_from_slice(&[0; 8]);
        for (station, secs) in records {
            data.push(*station);
            data.extend_from_slice(&secs.to_be_bytes());
        }
        data
    }

    fn connected_reader() -> (SrpidReader<MockTransport>, MockTransportHandle) {
        let (transport, handle) = MockTransport::new("/dev/ttyACM0");
        let config = ReaderConfig::for_family(DeviceFamily::Srpid)
            .with_settle_delay(Duration::ZERO)
            .with_timeout(Duration::from_millis(100));
        let mut reader = SrpidReader::new(transport, config);
        handle.queue_reply(encode_response(RESP_VERSION, &[0x02]).unwrap());
        reader.connect().unwrap();
        (reader, handle)
    }

    #[test]
    fn test_handshake_request_bytes() {
        let (_reader, handle) = connected_reader();
        assert_eq!(
            handle.written()[0],
            vec![0xC1, 0x32, 0, 0, 0, 0, 0, 0, 0xCE, 0x00]
        );
    }

    #[test]
    fn test_read_chip() {
        let (mut reader, handle) = connected_reader();
        let base = 1_718_355_600u32;
        handle.queue_reply(
            encode_response(
                RESP_CHIP_DATA,
                &chip(1205, &[(241, base), (50, base + 61), (51, base + 125), (242, base + 200)]),
            )
            .unwrap(),
        );

        assert!(reader.poll_presence().unwrap());
        let record = reader.read_record().unwrap();
        assert_eq!(record.card_number.as_u32(), 1205);
        assert_eq!(record.punches.len(), 2);
        assert_eq!(record.punches[0].station, 50);
        assert_eq!(record.punches[1].station, 51);
    }

    #[test]
    fn test_chip_read_error_means_empty() {
        let (mut reader, handle) = connected_reader();
        handle.queue_reply(encode_response(RESP_ERROR, &[ERR_READ_CHIP]).unwrap());
        assert!(!reader.poll_presence().unwrap());
    }

    #[test]
    fn test_com_error_is_violation() {
        let (mut reader, handle) = connected_reader();
        handle.queue_reply(encode_response(RESP_ERROR, &[ERR_COM]).unwrap());
        let err = reader.poll_presence().unwrap_err();
        assert!(matches!(err, HardwareError::ProtocolViolation { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_read_without_card_is_card_not_found() {
        let (mut reader, _handle) = connected_reader();
        let err = reader.read_record().unwrap_err();
        assert!(matches!(err, HardwareError::CardNotFound));
    }

    #[test]
    fn test_reconnect_repeats_handshake() {
        let (mut reader, handle) = connected_reader();
        handle.queue_reply(encode_response(RESP_VERSION, &[0x02]).unwrap());
        reader.reconnect().unwrap();
        assert!(reader.is_connected());
        assert_eq!(handle.open_count(), 2);
    }
}
