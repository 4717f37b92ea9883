//! End-to-end pipeline tests: wire bytes in, domain results out.

use chrono::{NaiveDate, NaiveTime, Timelike};
use punchlink_core::{
    CardType, DeviceFamily, DomainResult, FixedRaceClock, QueueCommand,
    constants::sportiduino::{RESP_CARD_DATA, RESP_VERSION},
};
use punchlink_hardware::{
    ReaderConfig,
    mock::{MockTransport, MockTransportHandle},
    readers::SportiduinoReader,
};
use punchlink_protocol::{
    sportiduino::{encode_frame, fragment_response},
    time::unix_to_local,
};
use punchlink_readout::{
    PipelineConfig,
    acquisition::{AcquisitionExit, AcquisitionWorker},
    backup::{BackupReader, BackupWriter},
    normalization::{NormalizationWorker, ResultCallback},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

const FIRST_PUNCH: u32 = 1_718_355_600;

fn card_payload(number: u16, stations: &[u8]) -> Vec<u8> {
    let mut data = number.to_be_bytes().to_vec();
    data.extend_from_slice(&[0; 8]);
    for (i, station) in stations.iter().enumerate() {
        data.push(*station);
        data.extend_from_slice(&(FIRST_PUNCH + i as u32 * 60).to_be_bytes());
    }
    data
}

fn queue_card(handle: &MockTransportHandle, number: u16, stations: &[u8]) {
    let mut wire = Vec::new();
    for frame in fragment_response(RESP_CARD_DATA, &card_payload(number, stations)) {
        wire.extend_from_slice(&frame);
    }
    handle.queue_reply(wire);
}

fn sportiduino() -> (SportiduinoReader<MockTransport>, MockTransportHandle) {
    let (transport, handle) = MockTransport::new("/dev/ttyUSB0");
    let config = ReaderConfig::for_family(DeviceFamily::Sportiduino)
        .with_settle_delay(Duration::ZERO)
        .with_timeout(Duration::from_millis(50));
    handle.queue_reply(encode_frame(RESP_VERSION, &[0x6B]).unwrap());
    (SportiduinoReader::new(transport, config), handle)
}

fn pipeline() -> PipelineConfig {
    PipelineConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_queue_wait(Duration::from_millis(20))
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fragmented_card_becomes_ordered_result() {
    let (reader, handle) = sportiduino();
    // Ten records do not fit one frame.
    queue_card(&handle, 4321, &[240, 31, 32, 33, 34, 35, 36, 37, 38, 245]);

    let first = unix_to_local(FIRST_PUNCH).unwrap();
    let clock = Arc::new(FixedRaceClock::new(
        first.date(),
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
    ));
    let dir = tempfile::tempdir().unwrap();
    let backup = BackupWriter::new(dir.path());

    let (tx, rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let seen: Arc<Mutex<Vec<DomainResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ResultCallback = Arc::new(move |result| sink.lock().unwrap().push(result));

    let acquisition = AcquisitionWorker::new(reader, tx, Arc::clone(&stop), pipeline());
    let acquisition = thread::spawn(move || acquisition.run());
    let normalization = tokio::spawn(
        NormalizationWorker::new(rx, Arc::clone(&stop), clock, Duration::from_millis(20))
            .with_callback(callback)
            .with_backup(backup.clone())
            .run(),
    );

    assert!(eventually(|| !seen.lock().unwrap().is_empty()).await);
    stop.store(true, Ordering::Release);
    assert!(matches!(acquisition.join().unwrap(), AcquisitionExit::Stopped));
    normalization.await.unwrap();

    let results = seen.lock().unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.card_number.as_u32(), 4321);
    assert_eq!(result.card_type, CardType::Sportiduino);

    let codes: Vec<u16> = result.splits.iter().map(|s| s.code).collect();
    assert_eq!(codes, vec![31, 32, 33, 34, 35, 36, 37, 38]);
    assert!(result.splits.windows(2).all(|w| {
        let gap = (w[1].time.num_seconds_from_midnight() + 86_400
            - w[0].time.num_seconds_from_midnight())
            % 86_400;
        gap == 60
    }));
    assert_eq!(result.start_time, Some(first.time()));
    assert!(result.finish_time.is_some());

    // The station beeped once for the card.
    assert!(
        handle
            .written()
            .iter()
            .any(|frame| frame.as_slice() == [0xFE, 0x59, 0x00, 0x59])
    );

    // Every delivered card is in the backup log as read.
    let path = backup.path_for(chrono::Local::now().date_naive());
    assert!(eventually(|| path.exists()).await);
    let date = NaiveDate::from_ymd_opt(2024, 6, 14).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let replayed = BackupReader::new(date, CardType::Sportiduino).parse(&text);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].card_number.as_u32(), 4321);
    assert_eq!(replayed[0].punches.len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupted_frames_are_absorbed() {
    let (reader, handle) = sportiduino();
    let mut bad = encode_frame(RESP_CARD_DATA, &card_payload(5, &[31])).unwrap().to_vec();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    handle.queue_reply(bad);
    queue_card(&handle, 6, &[31]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let acquisition = AcquisitionWorker::new(reader, tx, Arc::clone(&stop), pipeline());
    let acquisition = thread::spawn(move || acquisition.run());

    let command = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    stop.store(true, Ordering::Release);
    assert!(matches!(acquisition.join().unwrap(), AcquisitionExit::Stopped));

    let QueueCommand::CardData(record) = command else {
        panic!("unexpected command");
    };
    assert_eq!(record.card_number.as_u32(), 6);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_unplugged_station_ends_acquisition() {
    let (reader, handle) = sportiduino();
    let (tx, _rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let acquisition = AcquisitionWorker::new(reader, tx, stop, pipeline());
    let acquisition = thread::spawn(move || acquisition.run());

    while handle.written().is_empty() {
        thread::sleep(Duration::from_millis(1));
    }
    handle.fail_writes(true);

    let exit = acquisition.join().unwrap();
    assert!(matches!(exit, AcquisitionExit::TransportFailed(_)));
    assert!(exit.is_failure());
}
