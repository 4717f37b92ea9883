//! SFR USB HID reader protocol.
//!
//! Every request is a 64-byte output report:
//!
//! ```text
//! 3F 05 FD CODE ARG CS FE 00 .. 00       CS = carry_add(CODE, ARG)
//! ```
//!
//! The reader answers asynchronously with an input report. `report[3]`
//! echoes the request code, which is how a response is matched to its
//! request, and `report[4]` names the record position that was read:
//!
//! | position | content |
//! |----------|---------|
//! | 1 | card id, `report[5..9]`, all zero when no card is inserted |
//! | 3 | bib: `r5 + r6 * 200 + r7 * 40000` |
//! | 4 | number of records: `r5` |
//! | 5.. | punch: station `r5`, BCD `hh mm ss` in `r6..r9`; station 0 is empty |

use chrono::{NaiveDate, NaiveTime};

use punchlink_core::{
    CardNumber, CardType, Punch, RawCardRecord,
    constants::sfr::{
        BEEP_REQUEST, CMD_REQUEST, CODE_INDEX, HEADER, POS_BIB, POS_CARD_ID, POS_COUNT,
        POS_FIRST_PUNCH, POSITION_INDEX, RECORD_INDEX, REPORT_LEN, TRAILER,
    },
};

use crate::{ProtocolError, Result, checksum::carry_add, time::bcd};

/// Bytes a report needs for the widest record (punch: station plus h m s).
const MIN_REPORT_LEN: usize = RECORD_INDEX + 4;

/// Output report requesting the record at `position`.
///
/// # Examples
///
/// ```
/// use punchlink_protocol::sfr::request;
///
/// let report = request(1);
/// assert_eq!(&report[..7], &[0x3F, 0x05, 0xFD, 0x01, 0x01, 0x02, 0xFE]);
/// assert_eq!(report.len(), 64);
/// ```
#[must_use]
pub fn request(position: u8) -> [u8; REPORT_LEN] {
    let mut report = [0u8; REPORT_LEN];
    report[..HEADER.len()].copy_from_slice(&HEADER);
    report[CODE_INDEX] = CMD_REQUEST;
    report[POSITION_INDEX] = position;
    report[5] = carry_add(&[CMD_REQUEST, position]);
    report[6] = TRAILER;
    report
}

/// Output report making the reader beep once.
#[must_use]
pub fn beep() -> [u8; REPORT_LEN] {
    let mut report = [0u8; REPORT_LEN];
    report[..BEEP_REQUEST.len()].copy_from_slice(&BEEP_REQUEST);
    report
}

/// Record positions read for a card holding `count` records, after the bib
/// and the count itself.
///
/// Position 5 is always read; it may hold an empty punch.
pub fn punch_positions(count: u8) -> impl Iterator<Item = u8> {
    std::iter::once(POS_FIRST_PUNCH).chain(POS_FIRST_PUNCH + 1..count)
}

/// One punch as stored on an SFR card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfrPunch {
    pub station: u8,
    pub time: NaiveTime,
}

/// Decoded content of one input report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfrRecord {
    /// Card id, or `None` when the reader is empty.
    CardId(Option<[u8; 4]>),
    Bib(u32),
    Count(u8),
    /// Punch record, or `None` for an empty slot.
    Punch(Option<SfrPunch>),
    /// Position 2 and anything else without a known meaning.
    Other(u8),
}

/// An input report with its correlation fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfrReport {
    /// Echo of the request code.
    pub code: u8,
    pub position: u8,
    pub record: SfrRecord,
}

impl SfrReport {
    /// Parse an input report.
    ///
    /// # Errors
    /// - `ProtocolError::Truncated` if the report is too short
    /// - `ProtocolError::InvalidCardData` for a malformed BCD time
    pub fn parse(report: &[u8]) -> Result<Self> {
        if report.len() < MIN_REPORT_LEN {
            return Err(ProtocolError::Truncated {
                needed: MIN_REPORT_LEN,
                actual: report.len(),
            });
        }

        let position = report[POSITION_INDEX];
        let r = &report[RECORD_INDEX..];
        let record = match position {
            POS_CARD_ID => {
                let id = [r[0], r[1], r[2], r[3]];
                SfrRecord::CardId((id != [0; 4]).then_some(id))
            }
            POS_BIB => SfrRecord::Bib(
                u32::from(r[0]) + u32::from(r[1]) * 200 + u32::from(r[2]) * 40_000,
            ),
            POS_COUNT => SfrRecord::Count(r[0]),
            p if p >= POS_FIRST_PUNCH => SfrRecord::Punch(decode_punch(r)?),
            other => SfrRecord::Other(other),
        };

        Ok(SfrReport {
            code: report[CODE_INDEX],
            position,
            record,
        })
    }

    /// Returns `true` if this report answers the request `sent`.
    pub fn answers(&self, sent: &[u8]) -> bool {
        sent.get(CODE_INDEX) == Some(&self.code)
    }
}

fn decode_punch(r: &[u8]) -> Result<Option<SfrPunch>> {
    let station = r[0];
    if station == 0 {
        return Ok(None);
    }
    let (h, m, s) = (bcd(r[1])?, bcd(r[2])?, bcd(r[3])?);
    let time = NaiveTime::from_hms_opt(h, m, s).ok_or_else(|| {
        ProtocolError::invalid_card(format!("{h:02}:{m:02}:{s:02} is not a time of day"))
    })?;
    Ok(Some(SfrPunch { station, time }))
}

/// Collects the records of one card read into a [`RawCardRecord`].
#[derive(Debug, Default, Clone)]
pub struct CardAssembler {
    card_id: Option<[u8; 4]>,
    bib: Option<u32>,
    count: Option<u8>,
    punches: Vec<SfrPunch>,
}

impl CardAssembler {
    pub fn new(card_id: [u8; 4]) -> Self {
        Self {
            card_id: Some(card_id),
            ..Self::default()
        }
    }

    /// Record count reported by the card, once read.
    pub fn count(&self) -> Option<u8> {
        self.count
    }

    pub fn push(&mut self, record: SfrRecord) {
        match record {
            SfrRecord::CardId(id) => self.card_id = id,
            SfrRecord::Bib(bib) => self.bib = Some(bib),
            SfrRecord::Count(count) => self.count = Some(count),
            SfrRecord::Punch(Some(punch)) => self.punches.push(punch),
            SfrRecord::Punch(None) | SfrRecord::Other(_) => {}
        }
    }

    /// Build the record. SFR cards carry no start or finish time; the card
    /// number is the bib.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidCardData` if no non-zero bib was read.
    pub fn finish(self, date: NaiveDate) -> Result<RawCardRecord> {
        let bib = self
            .bib
            .ok_or_else(|| ProtocolError::invalid_card("bib record missing"))?;
        let card_number =
            CardNumber::new(bib).map_err(|e| ProtocolError::invalid_card(e.to_string()))?;

        let mut record = RawCardRecord::new(card_number, CardType::Sfr);
        if let Some(id) = self.card_id {
            record = record.with_chip_id(id);
        }
        record.punches = self
            .punches
            .into_iter()
            .map(|p| Punch::new(u16::from(p.station), date.and_time(p.time)))
            .collect();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn report(position: u8, record: &[u8]) -> Vec<u8> {
        let mut r = vec![0u8; REPORT_LEN];
        r[..3].copy_from_slice(&HEADER);
        r[CODE_INDEX] = CMD_REQUEST;
        r[POSITION_INDEX] = position;
        r[RECORD_INDEX..RECORD_INDEX + record.len()].copy_from_slice(record);
        r
    }

    #[rstest]
    #[case(1, 0x02)]
    #[case(3, 0x04)]
    #[case(0xFF, 0x01)]
    fn test_request_checksum(#[case] position: u8, #[case] cs: u8) {
        let r = request(position);
        assert_eq!(r[4], position);
        assert_eq!(r[5], cs);
        assert_eq!(r[6], TRAILER);
        assert!(r[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_beep_report() {
        let r = beep();
        assert_eq!(&r[..7], &[0x3F, 0x05, 0xFD, 0x03, 0x01, 0x04, 0xFE]);
        assert_eq!(r.len(), REPORT_LEN);
    }

    #[test]
    fn test_parse_card_id() {
        let parsed = SfrReport::parse(&report(1, &[0x12, 0x34, 0x56, 0x78])).unwrap();
        assert_eq!(parsed.record, SfrRecord::CardId(Some([0x12, 0x34, 0x56, 0x78])));

        let empty = SfrReport::parse(&report(1, &[0, 0, 0, 0])).unwrap();
        assert_eq!(empty.record, SfrRecord::CardId(None));
    }

    #[test]
    fn test_parse_bib() {
        let parsed = SfrReport::parse(&report(3, &[17, 2, 1])).unwrap();
        assert_eq!(parsed.record, SfrRecord::Bib(17 + 400 + 40_000));
    }

    #[test]
    fn test_parse_punch() {
        let parsed = SfrReport::parse(&report(7, &[45, 0x10, 0x05, 0x59])).unwrap();
        assert_eq!(
            parsed.record,
            SfrRecord::Punch(Some(SfrPunch {
                station: 45,
                time: NaiveTime::from_hms_opt(10, 5, 59).unwrap()
            }))
        );
        let empty = SfrReport::parse(&report(5, &[0, 0x10, 0x05, 0x59])).unwrap();
        assert_eq!(empty.record, SfrRecord::Punch(None));
    }

    #[rstest]
    #[case(&[45, 0x1A, 0x00, 0x00])]
    #[case(&[45, 0x25, 0x00, 0x00])]
    fn test_parse_bad_punch_time(#[case] record: &[u8]) {
        assert!(matches!(
            SfrReport::parse(&report(6, record)),
            Err(ProtocolError::InvalidCardData(_))
        ));
    }

    #[test]
    fn test_short_report() {
        assert!(matches!(
            SfrReport::parse(&[0x3F, 0x05, 0xFD, 0x01]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_answers_matches_echoed_code() {
        let parsed = SfrReport::parse(&report(1, &[1, 2, 3, 4])).unwrap();
        assert!(parsed.answers(&request(1)));
        assert!(!parsed.answers(&beep()));
    }

    #[rstest]
    #[case(0, vec![5])]
    #[case(6, vec![5])]
    #[case(9, vec![5, 6, 7, 8])]
    fn test_punch_positions(#[case] count: u8, #[case] expected: Vec<u8>) {
        assert_eq!(punch_positions(count).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_assembler_builds_record() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        let mut assembler = CardAssembler::new([9, 9, 9, 9]);
        assembler.push(SfrRecord::Bib(321));
        assembler.push(SfrRecord::Count(7));
        assembler.push(SfrRecord::Punch(None));
        for (station, minute) in [(31, 1), (32, 2)] {
            assembler.push(SfrRecord::Punch(Some(SfrPunch {
                station,
                time: NaiveTime::from_hms_opt(11, minute, 0).unwrap(),
            })));
        }
        assert_eq!(assembler.count(), Some(7));

        let record = assembler.finish(date).unwrap();
        assert_eq!(record.card_number.as_u32(), 321);
        assert_eq!(record.card_type, CardType::Sfr);
        assert_eq!(record.chip_id.as_deref(), Some(&[9, 9, 9, 9][..]));
        assert_eq!(record.start_time, None);
        assert_eq!(record.finish_time, None);
        let stations: Vec<u16> = record.punches.iter().map(|p| p.station).collect();
        assert_eq!(stations, vec![31, 32]);
        assert_eq!(record.punches[1].time, date.and_hms_opt(11, 2, 0).unwrap());
    }

    #[test]
    fn test_assembler_requires_bib() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        assert!(CardAssembler::new([1, 1, 1, 1]).finish(date).is_err());

        let mut zero = CardAssembler::new([1, 1, 1, 1]);
        zero.push(SfrRecord::Bib(0));
        assert!(zero.finish(date).is_err());
    }
}
