//! The acquisition worker.
//!
//! Owns one punch reader and drives it on a blocking thread:
//!
//! ```text
//! Connecting ──► Polling ──► Reading ──► Polling
//!     │             │           │
//!     └─────────────┴───────────┴──────► Disconnected
//! ```
//!
//! A card that is read completely is enqueued and then acknowledged on the
//! station. Per-record errors are logged and polling goes on, up to
//! [`PipelineConfig::max_consecutive_errors`] in a row. A transport failure
//! ends the worker at once; reconnecting is left to the controller's owner.

use punchlink_core::{DeviceFamily, QueueCommand, RawCardRecord};
use punchlink_hardware::{HardwareError, PunchReader};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;

/// Where the acquisition loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    Connecting,
    Polling,
    Reading,
    Disconnected,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Connecting => "connecting",
            AcquisitionState::Polling => "polling",
            AcquisitionState::Reading => "reading",
            AcquisitionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why the acquisition worker ended.
#[derive(Debug)]
#[non_exhaustive]
pub enum AcquisitionExit {
    /// The stop flag was set.
    Stopped,
    /// The normalization side dropped the queue.
    QueueClosed,
    /// The reader could not be opened.
    ConnectFailed(HardwareError),
    /// The transport failed while running.
    TransportFailed(HardwareError),
    /// Too many recoverable errors in a row.
    TooManyErrors { count: u32, last: HardwareError },
}

impl AcquisitionExit {
    /// Returns `true` if the worker ended because of the device.
    pub fn is_failure(&self) -> bool {
        !matches!(self, AcquisitionExit::Stopped | AcquisitionExit::QueueClosed)
    }
}

impl fmt::Display for AcquisitionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionExit::Stopped => f.write_str("stopped"),
            AcquisitionExit::QueueClosed => f.write_str("queue closed"),
            AcquisitionExit::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            AcquisitionExit::TransportFailed(err) => write!(f, "transport failed: {err}"),
            AcquisitionExit::TooManyErrors { count, last } => {
                write!(f, "{count} consecutive errors, last: {err}", err = last)
            }
        }
    }
}

/// Outcome of one poll-and-read cycle.
enum Cycle {
    Idle,
    Delivered,
    Discarded,
    Failed(HardwareError),
    Exit(AcquisitionExit),
}

/// Producer side of the hand-off queue.
#[derive(Debug)]
pub struct AcquisitionWorker<R> {
    reader: R,
    queue: mpsc::UnboundedSender<QueueCommand>,
    stop: Arc<AtomicBool>,
    config: PipelineConfig,
    state: AcquisitionState,
    consecutive_errors: u32,
}

impl<R: PunchReader> AcquisitionWorker<R> {
    pub fn new(
        reader: R,
        queue: mpsc::UnboundedSender<QueueCommand>,
        stop: Arc<AtomicBool>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            reader,
            queue,
            stop,
            config,
            state: AcquisitionState::Connecting,
            consecutive_errors: 0,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    fn family(&self) -> DeviceFamily {
        self.reader.family()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn enter(&mut self, state: AcquisitionState) {
        if self.state != state {
            debug!(family = %self.family(), from = %self.state, to = %state, "acquisition state");
            self.state = state;
        }
    }

    /// Sleep for `duration`, waking at least once per poll interval to
    /// check the stop flag. Returns `false` if stopped.
    fn pause(&self, duration: Duration) -> bool {
        let step = self.config.poll_interval.max(Duration::from_millis(1));
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.stopped() {
                return false;
            }
            let nap = remaining.min(step);
            thread::sleep(nap);
            remaining -= nap;
        }
        !self.stopped()
    }

    /// Run until stopped or the device fails. Blocks the calling thread.
    pub fn run(mut self) -> AcquisitionExit {
        let exit = self.run_loop();
        self.reader.disconnect();
        self.enter(AcquisitionState::Disconnected);

        if exit.is_failure() {
            error!(family = %self.family(), reason = %exit, "acquisition worker ended");
        } else {
            info!(family = %self.family(), reason = %exit, "acquisition worker ended");
        }
        exit
    }

    fn run_loop(&mut self) -> AcquisitionExit {
        if !self.pause(self.config.startup_delay) {
            return AcquisitionExit::Stopped;
        }

        self.enter(AcquisitionState::Connecting);
        if let Err(err) = self.reader.connect() {
            return AcquisitionExit::ConnectFailed(err);
        }
        info!(family = %self.family(), "reader connected, polling for cards");
        self.enter(AcquisitionState::Polling);

        loop {
            if self.stopped() {
                return AcquisitionExit::Stopped;
            }
            if self.queue.is_closed() {
                return AcquisitionExit::QueueClosed;
            }

            match self.cycle() {
                Cycle::Idle | Cycle::Delivered | Cycle::Discarded => self.consecutive_errors = 0,
                Cycle::Failed(err) => {
                    self.consecutive_errors += 1;
                    warn!(
                        family = %self.family(),
                        error = %err,
                        count = self.consecutive_errors,
                        "read error"
                    );
                    if self.consecutive_errors >= self.config.max_consecutive_errors {
                        return AcquisitionExit::TooManyErrors {
                            count: self.consecutive_errors,
                            last: err,
                        };
                    }
                }
                Cycle::Exit(exit) => return exit,
            }
            self.enter(AcquisitionState::Polling);

            if !self.pause(self.config.poll_interval) {
                return AcquisitionExit::Stopped;
            }
        }
    }

    fn cycle(&mut self) -> Cycle {
        match self.reader.poll_presence() {
            Ok(false) => return Cycle::Idle,
            Ok(true) => {}
            Err(err) => return self.classify(err),
        }

        self.enter(AcquisitionState::Reading);
        let record = match self.reader.read_record() {
            Ok(record) => record,
            Err(err) if err.is_card_gone() => {
                info!(family = %self.family(), error = %err, "card left the reader, read discarded");
                return Cycle::Discarded;
            }
            Err(err) => return self.classify(err),
        };

        if let Err(exit) = self.deliver(record) {
            return Cycle::Exit(exit);
        }

        match self.reader.acknowledge() {
            Ok(()) => Cycle::Delivered,
            Err(err) if err.is_fatal() => Cycle::Exit(AcquisitionExit::TransportFailed(err)),
            Err(err) => {
                warn!(family = %self.family(), error = %err, "acknowledge failed");
                Cycle::Delivered
            }
        }
    }

    fn classify(&self, err: HardwareError) -> Cycle {
        if err.is_fatal() {
            Cycle::Exit(AcquisitionExit::TransportFailed(err))
        } else {
            Cycle::Failed(err)
        }
    }

    fn deliver(&self, record: RawCardRecord) -> Result<(), AcquisitionExit> {
        info!(
            family = %self.family(),
            card = %record.card_number,
            card_type = %record.card_type,
            punches = record.punches.len(),
            "card read"
        );
        self.queue
            .send(QueueCommand::CardData(record))
            .map_err(|_| AcquisitionExit::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punchlink_core::{CardNumber, CardType};
    use punchlink_hardware::mock::{MockPunchReader, MockReaderHandle};

    fn card(n: u32) -> RawCardRecord {
        RawCardRecord::new(CardNumber::new(n).unwrap(), CardType::Sportiduino)
    }

    fn fast() -> PipelineConfig {
        PipelineConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_max_consecutive_errors(3)
    }

    fn worker(
        config: PipelineConfig,
    ) -> (
        AcquisitionWorker<MockPunchReader>,
        MockReaderHandle,
        mpsc::UnboundedReceiver<QueueCommand>,
        Arc<AtomicBool>,
    ) {
        let (reader, handle) = MockPunchReader::new(DeviceFamily::Sportiduino);
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = AcquisitionWorker::new(reader, tx, Arc::clone(&stop), config);
        (worker, handle, rx, stop)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<QueueCommand>) -> Vec<u32> {
        let mut numbers = Vec::new();
        while let Ok(QueueCommand::CardData(record)) = rx.try_recv() {
            numbers.push(record.card_number.as_u32());
        }
        numbers
    }

    #[test]
    fn test_reads_enqueue_then_acknowledge() {
        let (worker, handle, mut rx, _stop) = worker(fast());
        handle.present(card(1));
        handle.present(card(2));
        handle.unplug();

        let exit = worker.run();
        assert!(matches!(exit, AcquisitionExit::TransportFailed(_)));
        assert_eq!(drain(&mut rx), vec![1, 2]);
        assert_eq!(handle.acknowledged(), 2);
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_card_removed_mid_read_is_never_enqueued() {
        let (worker, handle, mut rx, _stop) = worker(fast());
        handle.present_and_remove(card(1));
        handle.present(card(2));
        handle.unplug();

        worker.run();
        assert_eq!(drain(&mut rx), vec![2]);
        assert_eq!(handle.acknowledged(), 1);
    }

    #[test]
    fn test_recoverable_errors_are_bounded() {
        let (worker, handle, mut rx, _stop) = worker(fast());
        for _ in 0..3 {
            handle.fail_next_poll(HardwareError::ChecksumMismatch {
                expected: 1,
                actual: 2,
            });
        }

        match worker.run() {
            AcquisitionExit::TooManyErrors { count, last } => {
                assert_eq!(count, 3);
                assert!(matches!(last, HardwareError::ChecksumMismatch { .. }));
            }
            other => panic!("unexpected exit: {other}"),
        }
        assert!(drain(&mut rx).is_empty());
        assert_eq!(handle.disconnects(), 1);
    }

    #[test]
    fn test_success_resets_error_count() {
        let (worker, handle, mut rx, _stop) = worker(fast());
        handle.fail_next_poll(HardwareError::violation("garbage"));
        handle.fail_next_poll(HardwareError::violation("garbage"));
        handle.present(card(5));
        handle.fail_next_poll(HardwareError::timeout(500));
        handle.fail_next_poll(HardwareError::timeout(500));
        handle.unplug();

        assert!(matches!(worker.run(), AcquisitionExit::TransportFailed(_)));
        assert_eq!(drain(&mut rx), vec![5]);
    }

    #[test]
    fn test_connect_failure_ends_worker() {
        let (worker, handle, _rx, _stop) = worker(fast());
        handle.fail_connect(true);

        let exit = worker.run();
        assert!(matches!(exit, AcquisitionExit::ConnectFailed(_)));
        assert!(exit.is_failure());
        assert_eq!(handle.polls(), 0);
    }

    #[test]
    fn test_stop_before_start() {
        let (worker, handle, _rx, stop) = worker(fast());
        stop.store(true, Ordering::Release);

        let exit = worker.run();
        assert!(matches!(exit, AcquisitionExit::Stopped));
        assert!(!exit.is_failure());
        assert_eq!(handle.connects(), 0);
    }

    #[test]
    fn test_stop_while_polling() {
        let (worker, handle, _rx, stop) = worker(fast());
        let thread = thread::spawn(move || worker.run());

        while handle.polls() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Release);

        assert!(matches!(thread.join().unwrap(), AcquisitionExit::Stopped));
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_closed_queue_ends_worker() {
        let (worker, handle, rx, _stop) = worker(fast());
        drop(rx);
        handle.present(card(3));

        assert!(matches!(worker.run(), AcquisitionExit::QueueClosed));
        assert_eq!(handle.acknowledged(), 0);
    }

    #[test]
    fn test_startup_delay_is_interruptible() {
        let config = fast()
            .with_startup_delay(Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(5));
        let (worker, handle, _rx, stop) = worker(config);
        let thread = thread::spawn(move || worker.run());

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);

        assert!(matches!(thread.join().unwrap(), AcquisitionExit::Stopped));
        assert_eq!(handle.connects(), 0);
    }
}
