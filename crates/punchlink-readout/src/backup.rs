//! Plain-text backup log of every card read.
//!
//! Each successfully read card is appended as one block to
//! `si<YYYYMMDD>.log` in the backup directory:
//!
//! ```text
//! start
//! 412345
//! 10:02:11
//! 11:15:40
//! split_start
//! 31 10:15:30
//! 32 10:20:05
//! split_end
//! end
//! ```
//!
//! Start and finish lines are left empty when the card carries no such
//! time. [`BackupWriter`] never blocks its caller; [`BackupReader`] turns a
//! log back into records for replay.

use chrono::{Local, NaiveDate, NaiveTime};
use punchlink_core::{CardNumber, CardType, Punch, RawCardRecord, constants::backup};
use std::{
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{ReadoutError, Result};

/// Render one backup block.
#[must_use]
pub fn format_block(record: &RawCardRecord) -> String {
    let time = |t: Option<chrono::NaiveDateTime>| {
        t.map(|t| t.format(backup::TIME_FORMAT).to_string())
            .unwrap_or_default()
    };

    let mut block = String::new();
    let _ = writeln!(block, "{}", backup::BLOCK_START);
    let _ = writeln!(block, "{}", record.card_number);
    let _ = writeln!(block, "{}", time(record.start_time));
    let _ = writeln!(block, "{}", time(record.finish_time));
    let _ = writeln!(block, "{}", backup::SPLITS_START);
    for punch in &record.punches {
        let _ = writeln!(
            block,
            "{} {}",
            punch.station,
            punch.time.format(backup::TIME_FORMAT)
        );
    }
    let _ = writeln!(block, "{}", backup::SPLITS_END);
    let _ = writeln!(block, "{}", backup::BLOCK_END);
    block
}

/// `si<YYYYMMDD>.log`
#[must_use]
pub fn file_name(date: NaiveDate) -> String {
    format!(
        "{}{}.{}",
        backup::FILE_PREFIX,
        date.format("%Y%m%d"),
        backup::FILE_EXTENSION
    )
}

/// Appends card blocks to the dated backup file.
///
/// Clones share one lock, so blocks from concurrent writes never interleave.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backup file for a calendar day.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(file_name(date))
    }

    /// Append `record` to the file of `date`, creating directory and file
    /// as needed. Returns the path written to.
    ///
    /// The block goes out in a single write.
    pub fn append(&self, record: &RawCardRecord, date: NaiveDate) -> io::Result<PathBuf> {
        let block = format_block(record);
        let path = self.path_for(date);

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(block.as_bytes())?;
        file.flush()?;
        Ok(path)
    }

    /// Append `record` to today's file in the background.
    ///
    /// Returns immediately. Failures are logged and otherwise ignored.
    pub fn dispatch(&self, record: RawCardRecord) {
        let writer = self.clone();
        let job = move || {
            let date = Local::now().date_naive();
            match writer.append(&record, date) {
                Ok(path) => {
                    debug!(card = %record.card_number, path = %path.display(), "backup written");
                }
                Err(err) => {
                    warn!(card = %record.card_number, error = %err, "backup write failed");
                }
            }
        };

        match Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn_blocking(job)),
            Err(_) => drop(std::thread::spawn(job)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    BlockStart,
    CardNumber,
    StartTime,
    FinishTime,
    SplitsStart,
    Split,
    BlockEnd,
}

#[derive(Debug)]
struct Partial {
    line: usize,
    record: Option<RawCardRecord>,
    start: Option<NaiveTime>,
    finish: Option<NaiveTime>,
}

/// Parses backup logs back into card records.
///
/// The log stores times of day only; every timestamp is placed on the
/// reader's date. Malformed blocks are skipped with a warning.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use punchlink_core::CardType;
/// use punchlink_readout::backup::BackupReader;
///
/// let log = "start\n7\n\n\nsplit_start\n31 10:15:30\nsplit_end\nend\n";
/// let reader = BackupReader::new(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(), CardType::Si5);
/// let records = reader.parse(log);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].punches[0].station, 31);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct BackupReader {
    date: NaiveDate,
    card_type: CardType,
}

impl BackupReader {
    pub fn new(date: NaiveDate, card_type: CardType) -> Self {
        Self { date, card_type }
    }

    /// Date encoded in a `si<YYYYMMDD>.log` file name.
    pub fn date_from_path(path: &Path) -> Option<NaiveDate> {
        let stem = path.file_stem()?.to_str()?;
        let digits = stem.strip_prefix(backup::FILE_PREFIX)?;
        NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
    }

    /// Read a whole backup file. The date comes from the file name, or
    /// today when the name carries none.
    ///
    /// # Errors
    /// `ReadoutError::Io` if the file cannot be read.
    pub fn read_file(path: &Path, card_type: CardType) -> Result<Vec<RawCardRecord>> {
        let text = fs::read_to_string(path)?;
        let date = Self::date_from_path(path).unwrap_or_else(|| Local::now().date_naive());
        Ok(Self::new(date, card_type).parse(&text))
    }

    /// Parse every well-formed block of `text`, in file order.
    pub fn parse(&self, text: &str) -> Vec<RawCardRecord> {
        let mut records = Vec::new();
        let mut expect = Expect::BlockStart;
        let mut partial: Option<Partial> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line == backup::BLOCK_START {
                if let Some(open) = partial.take() {
                    warn!(line = open.line, "backup block not terminated, skipped");
                }
                partial = Some(Partial {
                    line: line_no,
                    record: None,
                    start: None,
                    finish: None,
                });
                expect = Expect::CardNumber;
                continue;
            }

            let Some(block) = partial.as_mut() else {
                if !line.is_empty() {
                    warn!(line = line_no, "text outside of a backup block ignored");
                }
                continue;
            };

            match self.step(expect, line, line_no, block) {
                Ok(Some(next)) => expect = next,
                Ok(None) => {
                    if let Some(done) = partial.take().and_then(|p| self.finish(p)) {
                        records.push(done);
                    }
                    expect = Expect::BlockStart;
                }
                Err(err) => {
                    warn!(error = %err, "backup block skipped");
                    partial = None;
                    expect = Expect::BlockStart;
                }
            }
        }

        if let Some(open) = partial {
            warn!(line = open.line, "backup log ends inside a block");
        }
        records
    }

    /// Consume one line of an open block. `Ok(None)` closes the block.
    fn step(
        &self,
        expect: Expect,
        line: &str,
        line_no: usize,
        block: &mut Partial,
    ) -> Result<Option<Expect>> {
        match expect {
            Expect::BlockStart => Ok(Some(Expect::BlockStart)),
            Expect::CardNumber => {
                let number: CardNumber = line
                    .parse()
                    .map_err(|_| ReadoutError::malformed(line_no, format!("bad card number {line:?}")))?;
                block.record = Some(RawCardRecord::new(number, self.card_type));
                Ok(Some(Expect::StartTime))
            }
            Expect::StartTime => {
                block.start = parse_optional_time(line, line_no)?;
                Ok(Some(Expect::FinishTime))
            }
            Expect::FinishTime => {
                block.finish = parse_optional_time(line, line_no)?;
                Ok(Some(Expect::SplitsStart))
            }
            Expect::SplitsStart if line == backup::SPLITS_START => Ok(Some(Expect::Split)),
            Expect::SplitsStart => Err(ReadoutError::malformed(
                line_no,
                format!("expected {:?}", backup::SPLITS_START),
            )),
            Expect::Split if line == backup::SPLITS_END => Ok(Some(Expect::BlockEnd)),
            Expect::Split if line.is_empty() => Ok(Some(Expect::Split)),
            Expect::Split => {
                let punch = self.parse_split(line, line_no)?;
                if let Some(record) = block.record.as_mut() {
                    record.punches.push(punch);
                }
                Ok(Some(Expect::Split))
            }
            Expect::BlockEnd if line == backup::BLOCK_END => Ok(None),
            Expect::BlockEnd => Err(ReadoutError::malformed(
                line_no,
                format!("expected {:?}", backup::BLOCK_END),
            )),
        }
    }

    fn parse_split(&self, line: &str, line_no: usize) -> Result<Punch> {
        let mut fields = line.split_whitespace();
        let (Some(code), Some(time), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(ReadoutError::malformed(line_no, format!("bad split {line:?}")));
        };
        let station: u16 = code
            .parse()
            .map_err(|_| ReadoutError::malformed(line_no, format!("bad station code {code:?}")))?;
        let time = parse_time(time, line_no)?;
        Ok(Punch::new(station, self.date.and_time(time)))
    }

    fn finish(&self, partial: Partial) -> Option<RawCardRecord> {
        let mut record = partial.record?;
        record.start_time = partial.start.map(|t| self.date.and_time(t));
        record.finish_time = partial.finish.map(|t| self.date.and_time(t));
        Some(record)
    }
}

fn parse_time(text: &str, line_no: usize) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, backup::TIME_FORMAT)
        .map_err(|_| ReadoutError::malformed(line_no, format!("bad time {text:?}")))
}

fn parse_optional_time(text: &str, line_no: usize) -> Result<Option<NaiveTime>> {
    if text.is_empty() {
        Ok(None)
    } else {
        parse_time(text, line_no).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    fn sample() -> RawCardRecord {
        RawCardRecord::new(CardNumber::new(412_345).unwrap(), CardType::Si5)
            .with_start(at(10, 2, 11))
            .with_punch(Punch::new(31, at(10, 15, 30)))
            .with_punch(Punch::new(32, at(10, 20, 5)))
    }

    #[test]
    fn test_block_format() {
        assert_eq!(
            format_block(&sample()),
            "start\n412345\n10:02:11\n\nsplit_start\n31 10:15:30\n32 10:20:05\nsplit_end\nend\n"
        );
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(day()), "si20250614.log");
        assert_eq!(
            BackupReader::date_from_path(Path::new("/tmp/si20250614.log")),
            Some(day())
        );
        assert_eq!(BackupReader::date_from_path(Path::new("notes.log")), None);
    }

    #[test]
    fn test_append_accumulates_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BackupWriter::new(dir.path().join("backup"));

        let first = writer.append(&sample(), day()).unwrap();
        let second = writer.append(&sample(), day()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("backup").join("si20250614.log"));

        let text = fs::read_to_string(&first).unwrap();
        assert_eq!(text.matches("split_start").count(), 2);
    }

    #[test]
    fn test_written_log_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BackupWriter::new(dir.path());
        let path = writer.append(&sample(), day()).unwrap();

        let records = BackupReader::read_file(&path, CardType::Si5).unwrap();
        assert_eq!(records, vec![sample()]);
    }

    #[test]
    fn test_dispatch_outside_runtime_writes_eventually() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BackupWriter::new(dir.path());
        writer.dispatch(sample());

        let path = writer.path_for(Local::now().date_naive());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !path.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let writer = BackupWriter::new(blocker.join("sub"));
        assert!(writer.append(&sample(), day()).is_err());
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let log = "\n  start \n 17\n\n 11:00:00\nsplit_start\n  40   10:30:00 \n\nsplit_end\nend\n\n";
        let records = BackupReader::new(day(), CardType::Sportiduino).parse(log);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.card_number.as_u32(), 17);
        assert_eq!(record.card_type, CardType::Sportiduino);
        assert_eq!(record.start_time, None);
        assert_eq!(record.finish_time, Some(at(11, 0, 0)));
        assert_eq!(record.punches, vec![Punch::new(40, at(10, 30, 0))]);
    }

    #[test]
    fn test_parse_skips_malformed_blocks() {
        let log = concat!(
            "start\nabc\n\n\nsplit_start\nsplit_end\nend\n",
            "start\n5\n\n\nsplit_start\n31 25:00:00\nsplit_end\nend\n",
            "start\n6\n\n\nsplit_start\n31 10:00:00\n",
            "start\n7\n\n\nsplit_start\n32 10:05:00\nsplit_end\nend\n",
            "start\n8\n\n",
        );
        let records = BackupReader::new(day(), CardType::Si5).parse(log);
        let numbers: Vec<u32> = records.iter().map(|r| r.card_number.as_u32()).collect();
        assert_eq!(numbers, vec![7]);
    }
}
