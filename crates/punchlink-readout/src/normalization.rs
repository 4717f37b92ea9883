//! Raw card records to domain results.
//!
//! [`normalize`] is the pure mapping; [`NormalizationWorker`] runs it for
//! every record that comes off the hand-off queue, hands the result to the
//! registered callback and backs the raw record up.

use chrono::NaiveDateTime;
use punchlink_core::{DomainResult, DomainSplit, QueueCommand, RaceClock, RawCardRecord};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::{backup::BackupWriter, correction::correct_timestamp};

/// Receives every normalized result.
///
/// Called on tokio's blocking pool, one result at a time and in queue
/// order, so it may block. Hosts that need delivery on their own thread
/// must forward from here.
pub type ResultCallback = Arc<dyn Fn(DomainResult) + Send + Sync>;

/// Convert one card read into a [`DomainResult`].
///
/// Times of cards with a 12-hour clock are first placed relative to the
/// clock's zero time. Splits keep the card's punch order.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use punchlink_core::{CardNumber, CardType, FixedRaceClock, Punch, RawCardRecord};
/// use punchlink_readout::normalization::normalize;
///
/// let day = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
/// let clock = FixedRaceClock::new(day, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
/// let record = RawCardRecord::new(CardNumber::new(5)?, CardType::Si5)
///     .with_punch(Punch::new(31, day.and_hms_opt(7, 0, 0).unwrap()));
///
/// let result = normalize(&record, &clock);
/// assert_eq!(result.splits[0].time, NaiveTime::from_hms_opt(19, 0, 0).unwrap());
/// # Ok::<(), punchlink_core::Error>(())
/// ```
pub fn normalize(record: &RawCardRecord, clock: &dyn RaceClock) -> DomainResult {
    let zero_time = clock.zero_time();
    let corrected = |at: NaiveDateTime| {
        if record.card_type.has_twelve_hour_clock() {
            correct_timestamp(zero_time, at)
        } else {
            at
        }
    };

    let mut result = DomainResult::new(record.card_number, record.card_type);
    result.splits = record
        .punches
        .iter()
        .map(|punch| {
            let at = corrected(punch.time);
            DomainSplit {
                code: punch.station,
                time: at.time(),
                day_offset: clock.day_offset(at),
            }
        })
        .collect();
    result.start_time = record.start_time.map(|at| corrected(at).time());
    result.finish_time = record.finish_time.map(|at| corrected(at).time());
    result
}

/// Consumer side of the hand-off queue.
pub struct NormalizationWorker {
    queue: mpsc::UnboundedReceiver<QueueCommand>,
    stop: Arc<AtomicBool>,
    clock: Arc<dyn RaceClock>,
    callback: Option<ResultCallback>,
    backup: Option<BackupWriter>,
    queue_wait: Duration,
}

impl fmt::Debug for NormalizationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizationWorker")
            .field("stop", &self.stop)
            .field("has_callback", &self.callback.is_some())
            .field("backup", &self.backup)
            .field("queue_wait", &self.queue_wait)
            .finish_non_exhaustive()
    }
}

impl NormalizationWorker {
    pub fn new(
        queue: mpsc::UnboundedReceiver<QueueCommand>,
        stop: Arc<AtomicBool>,
        clock: Arc<dyn RaceClock>,
        queue_wait: Duration,
    ) -> Self {
        Self {
            queue,
            stop,
            clock,
            callback: None,
            backup: None,
            queue_wait,
        }
    }

    pub fn with_callback(mut self, callback: ResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_backup(mut self, backup: BackupWriter) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Process queued records until stopped.
    ///
    /// Returns once the stop flag is set and the records already queued are
    /// delivered, or once the producer is gone and the queue is drained.
    pub async fn run(mut self) {
        debug!("normalization worker started");
        loop {
            if self.stop.load(Ordering::Acquire) {
                while let Ok(command) = self.queue.try_recv() {
                    self.handle(command).await;
                }
                debug!("normalization worker stopped");
                return;
            }

            match tokio::time::timeout(self.queue_wait, self.queue.recv()).await {
                Ok(Some(command)) => self.handle(command).await,
                Ok(None) => {
                    debug!("hand-off queue closed, normalization worker finished");
                    return;
                }
                Err(_) => trace!("hand-off queue idle"),
            }
        }
    }

    async fn handle(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::CardData(record) => {
                let result = normalize(&record, self.clock.as_ref());
                info!(
                    card = %result.card_number,
                    card_type = %result.card_type,
                    splits = result.splits.len(),
                    "card normalized"
                );
                match &self.callback {
                    Some(callback) => deliver(Arc::clone(callback), result).await,
                    None => debug!(card = %record.card_number, "no result callback registered"),
                }
                if let Some(backup) = &self.backup {
                    backup.dispatch(record);
                }
            }
            other => debug!(kind = other.kind(), "unhandled hand-off command"),
        }
    }
}

/// Run `callback` off the async workers and wait for it, keeping results in order.
async fn deliver(callback: ResultCallback, result: DomainResult) {
    let card = result.card_number;
    if let Err(err) = tokio::task::spawn_blocking(move || callback(result)).await {
        error!(%card, error = %err, "result callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use punchlink_core::{CardNumber, CardType, FixedRaceClock, Punch};
    use std::sync::Mutex;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn clock() -> FixedRaceClock {
        FixedRaceClock::new(day(14), hms(8, 0, 0))
    }

    fn card(card_type: CardType, n: u32) -> RawCardRecord {
        RawCardRecord::new(CardNumber::new(n).unwrap(), card_type)
    }

    #[test]
    fn test_split_order_is_punch_order() {
        let record = card(CardType::Sportiduino, 9)
            .with_punch(Punch::new(31, day(14).and_hms_opt(10, 0, 0).unwrap()))
            .with_punch(Punch::new(32, day(14).and_hms_opt(9, 0, 0).unwrap()))
            .with_punch(Punch::new(33, day(14).and_hms_opt(11, 0, 0).unwrap()));

        let result = normalize(&record, &clock());
        let splits: Vec<(u16, NaiveTime)> =
            result.splits.iter().map(|s| (s.code, s.time)).collect();
        assert_eq!(
            splits,
            vec![(31, hms(10, 0, 0)), (32, hms(9, 0, 0)), (33, hms(11, 0, 0))]
        );
    }

    #[test]
    fn test_twelve_hour_card_is_corrected() {
        let record = card(CardType::Si5, 1)
            .with_start(day(14).and_hms_opt(7, 55, 0).unwrap())
            .with_punch(Punch::new(31, day(14).and_hms_opt(9, 0, 5).unwrap()))
            .with_punch(Punch::new(32, day(14).and_hms_opt(1, 30, 0).unwrap()))
            .with_finish(day(14).and_hms_opt(2, 0, 0).unwrap());

        let result = normalize(&record, &clock());
        assert_eq!(result.start_time, Some(hms(19, 55, 0)));
        assert_eq!(result.splits[0].time, hms(9, 0, 5));
        assert_eq!(result.splits[1].time, hms(13, 30, 0));
        assert_eq!(result.finish_time, Some(hms(14, 0, 0)));
    }

    #[test]
    fn test_twenty_four_hour_card_is_untouched() {
        let record = card(CardType::Srpid, 2)
            .with_punch(Punch::new(31, day(14).and_hms_opt(7, 0, 0).unwrap()));
        let result = normalize(&record, &clock());
        assert_eq!(result.splits[0].time, hms(7, 0, 0));
    }

    #[test]
    fn test_day_offset_from_clock() {
        let record = card(CardType::Sportiduino, 3)
            .with_punch(Punch::new(31, day(14).and_hms_opt(23, 59, 0).unwrap()))
            .with_punch(Punch::new(32, day(15).and_hms_opt(0, 1, 0).unwrap()));
        let result = normalize(&record, &clock());
        let offsets: Vec<i32> = result.splits.iter().map(|s| s.day_offset).collect();
        assert_eq!(offsets, vec![0, 1]);
    }

    #[test]
    fn test_missing_start_and_finish_stay_missing() {
        let result = normalize(&card(CardType::Sfr, 417), &clock());
        assert_eq!(result.start_time, None);
        assert_eq!(result.finish_time, None);
        assert!(result.splits.is_empty());
    }

    fn collector() -> (ResultCallback, Arc<Mutex<Vec<DomainResult>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ResultCallback = Arc::new(move |result| sink.lock().unwrap().push(result));
        (callback, seen)
    }

    #[tokio::test]
    async fn test_worker_delivers_in_queue_order_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (callback, seen) = collector();
        let worker = NormalizationWorker::new(
            rx,
            Arc::new(AtomicBool::new(false)),
            Arc::new(clock()),
            Duration::from_millis(50),
        )
        .with_callback(callback);

        for n in [4, 2, 9] {
            tx.send(QueueCommand::CardData(card(CardType::Srpid, n))).unwrap();
        }
        drop(tx);
        worker.run().await;

        let numbers: Vec<u32> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.card_number.as_u32())
            .collect();
        assert_eq!(numbers, vec![4, 2, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_observes_stop_within_queue_wait() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = NormalizationWorker::new(
            rx,
            Arc::clone(&stop),
            Arc::new(clock()),
            Duration::from_secs(5),
        );
        let task = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        stop.store(true, Ordering::Release);
        tokio::time::timeout(Duration::from_secs(6), task)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_delivers_already_queued_records() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (callback, seen) = collector();
        let stop = Arc::new(AtomicBool::new(true));
        tx.send(QueueCommand::CardData(card(CardType::Sfr, 1))).unwrap();
        tx.send(QueueCommand::CardData(card(CardType::Sfr, 2))).unwrap();

        NormalizationWorker::new(rx, stop, Arc::new(clock()), Duration::from_secs(5))
            .with_callback(callback)
            .run()
            .await;

        assert_eq!(seen.lock().unwrap().len(), 2);
        drop(tx);
    }

    #[tokio::test]
    async fn test_callback_runs_off_the_runtime_thread() {
        let (tx, rx) = mpsc::unbounded_channel();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&threads);
        let callback: ResultCallback = Arc::new(move |_| {
            std::thread::sleep(Duration::from_millis(20));
            sink.lock().unwrap().push(std::thread::current().id());
        });
        let worker = NormalizationWorker::new(
            rx,
            Arc::new(AtomicBool::new(false)),
            Arc::new(clock()),
            Duration::from_millis(50),
        )
        .with_callback(callback);

        tx.send(QueueCommand::CardData(card(CardType::Srpid, 1))).unwrap();
        drop(tx);
        worker.run().await;

        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_end_worker() {
        let (tx, rx) = mpsc::unbounded_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ResultCallback = Arc::new(move |result: DomainResult| {
            let n = result.card_number.as_u32();
            assert_ne!(n, 1, "bad card");
            sink.lock().unwrap().push(n);
        });
        let worker = NormalizationWorker::new(
            rx,
            Arc::new(AtomicBool::new(false)),
            Arc::new(clock()),
            Duration::from_millis(50),
        )
        .with_callback(callback);

        tx.send(QueueCommand::CardData(card(CardType::Srpid, 1))).unwrap();
        tx.send(QueueCommand::CardData(card(CardType::Srpid, 2))).unwrap();
        drop(tx);
        worker.run().await;

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_backs_up_raw_record() {
        let dir = tempfile::tempdir().unwrap();
        let backup = BackupWriter::new(dir.path());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = NormalizationWorker::new(
            rx,
            Arc::new(AtomicBool::new(false)),
            Arc::new(clock()),
            Duration::from_millis(50),
        )
        .with_backup(backup.clone());

        let record = card(CardType::Si5, 77)
            .with_punch(Punch::new(31, day(14).and_hms_opt(7, 0, 0).unwrap()));
        tx.send(QueueCommand::CardData(record)).unwrap();
        drop(tx);
        worker.run().await;

        let path = backup.path_for(chrono::Local::now().date_naive());
        let mut text = String::new();
        for _ in 0..200 {
            text = std::fs::read_to_string(&path).unwrap_or_default();
            if text.contains("end") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The backup keeps the time as read, before correction.
        assert!(text.contains("31 07:00:00"));
        assert!(text.starts_with("start\n77\n"));
    }
}
