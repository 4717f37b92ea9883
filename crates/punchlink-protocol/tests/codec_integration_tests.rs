//! Integration tests for the codecs over tokio `FramedRead`.
//!
//! These tests drive the codecs the way an async serial stream would: bytes
//! arrive through an `AsyncRead`, frames come out of a `Stream`.

use futures::StreamExt;
use tokio_util::codec::FramedRead;

use punchlink_core::constants::sportiduino::RESP_CARD_DATA;
use punchlink_protocol::{
    ProtocolError, SportidentCodec, SportiduinoCodec,
    sportident::{self, StationEvent},
    sportiduino,
};

fn card_payload(number: u16, punches: usize) -> Vec<u8> {
    let mut data = number.to_be_bytes().to_vec();
    data.extend_from_slice(&[0; 8]);
    for i in 0..punches {
        data.push(31 + i as u8);
        data.extend_from_slice(&(1_718_355_600u32 + i as u32 * 60).to_be_bytes());
    }
    data
}

#[tokio::test]
async fn test_fragmented_card_over_framed_read() {
    // 10 + 5 * 12 = 70 bytes, three frames on the wire
    let payload = card_payload(1234, 12);
    let wire: Vec<u8> = sportiduino::fragment_response(RESP_CARD_DATA, &payload)
        .iter()
        .flat_map(|f| f.iter().copied())
        .collect();

    let mut framed = FramedRead::new(&wire[..], SportiduinoCodec::new());
    let response = framed.next().await.unwrap().unwrap();
    assert_eq!(response.code, RESP_CARD_DATA);

    let record = sportiduino::decode_card(&response.data).unwrap();
    assert_eq!(record.card_number.as_u32(), 1234);
    assert_eq!(record.punches.len(), 12);
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn test_station_event_sequence() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&sportident::encode_frame(0xE5, &[0x00, 0x01, 0x00, 0x00, 0x30, 0x39]).unwrap());
    wire.extend_from_slice(&sportident::encode_frame(0xE7, &[0x00, 0x01, 0x00, 0x00, 0x30, 0x39]).unwrap());

    let framed = FramedRead::new(&wire[..], SportidentCodec::new());
    let events: Vec<_> = framed
        .map(|r| StationEvent::from_response(&r.unwrap()))
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            Some(StationEvent::CardInserted(punchlink_core::CardType::Si5)),
            Some(StationEvent::CardRemoved)
        ]
    );
}

#[tokio::test]
async fn test_corrupted_frame_surfaces_as_error() {
    let mut wire = sportiduino::encode_frame(0x66, &[0x01]).unwrap().to_vec();
    wire[3] = 0x02;

    let mut framed = FramedRead::new(&wire[..], SportiduinoCodec::new());
    let result = framed.next().await.unwrap();
    assert!(matches!(result, Err(ProtocolError::ChecksumMismatch { .. })));
}
