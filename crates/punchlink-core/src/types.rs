use crate::{Result, error::Error};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware family of a punch reader.
///
/// Exactly one readout controller may be live per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// SPORTident BSM/BSF station (serial, extended protocol).
    Sportident,
    /// Sportiduino master station (serial, fragmented frames).
    Sportiduino,
    /// SRPid chip reader (serial, fixed-size requests).
    Srpid,
    /// SFR reader (USB HID).
    Sfr,
}

impl DeviceFamily {
    /// All supported families, in a stable order.
    pub const ALL: [DeviceFamily; 4] = [
        DeviceFamily::Sportident,
        DeviceFamily::Sportiduino,
        DeviceFamily::Srpid,
        DeviceFamily::Sfr,
    ];

    /// Lowercase identifier used in configuration files and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceFamily::Sportident => "sportident",
            DeviceFamily::Sportiduino => "sportiduino",
            DeviceFamily::Srpid => "srpid",
            DeviceFamily::Sfr => "sfr",
        }
    }

    /// Returns `true` if the family talks over USB HID instead of a serial port.
    #[inline]
    #[must_use]
    pub fn is_hid(self) -> bool {
        matches!(self, DeviceFamily::Sfr)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sportident" | "si" => Ok(DeviceFamily::Sportident),
            "sportiduino" => Ok(DeviceFamily::Sportiduino),
            "srpid" => Ok(DeviceFamily::Srpid),
            "sfr" => Ok(DeviceFamily::Sfr),
            other => Err(Error::UnknownFamily(other.to_string())),
        }
    }
}

/// Kind of card or chip carried by a competitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    /// SPORTident card 5. Stores times on a 12-hour clock.
    Si5,
    /// SPORTident card 6.
    Si6,
    /// SPORTident card 8 and later, including pCard.
    Si8,
    Sportiduino,
    Srpid,
    Sfr,
}

impl CardType {
    /// Returns `true` when the card stores times without AM/PM information.
    ///
    /// Punch, start and finish times of such cards are disambiguated against
    /// the race zero time before they reach the host.
    #[inline]
    #[must_use]
    pub fn has_twelve_hour_clock(self) -> bool {
        matches!(self, CardType::Si5)
    }

    /// Family of readers that produce this card type.
    #[must_use]
    pub fn family(self) -> DeviceFamily {
        match self {
            CardType::Si5 | CardType::Si6 | CardType::Si8 => DeviceFamily::Sportident,
            CardType::Sportiduino => DeviceFamily::Sportiduino,
            CardType::Srpid => DeviceFamily::Srpid,
            CardType::Sfr => DeviceFamily::Sfr,
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CardType::Si5 => "SI5",
            CardType::Si6 => "SI6",
            CardType::Si8 => "SI8",
            CardType::Sportiduino => "Sportiduino",
            CardType::Srpid => "SRPid",
            CardType::Sfr => "SFR",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CardType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "si5" => Ok(CardType::Si5),
            "si6" => Ok(CardType::Si6),
            "si8" => Ok(CardType::Si8),
            "sportiduino" => Ok(CardType::Sportiduino),
            "srpid" => Ok(CardType::Srpid),
            "sfr" => Ok(CardType::Sfr),
            other => Err(Error::UnknownCardType(other.to_string())),
        }
    }
}

/// Number printed on a card or assigned to a chip.
///
/// Zero is never a valid card number; readers report it for an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardNumber(u32);

impl CardNumber {
    /// Create a card number with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidCardFormat` if the number is zero.
    pub fn new(number: u32) -> Result<Self> {
        if number == 0 {
            return Err(Error::InvalidCardFormat(
                "Card number must be non-zero".to_string(),
            ));
        }
        Ok(CardNumber(number))
    }

    /// Get the raw card number.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CardNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let number: u32 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidCardFormat(format!("Invalid card number: {s}")))?;
        CardNumber::new(number)
    }
}

/// One timestamped station visit as stored on the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punch {
    /// Station code.
    pub station: u16,
    /// Wall-clock time as decoded from the card.
    pub time: NaiveDateTime,
    /// Undecoded record bytes, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
}

impl Punch {
    #[must_use]
    pub fn new(station: u16, time: NaiveDateTime) -> Self {
        Punch {
            station,
            time,
            raw: None,
        }
    }

    /// Attach the undecoded record bytes.
    #[must_use]
    pub fn with_raw(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// Everything read off one card in a single successful read.
///
/// Produced once per read and moved into the hand-off queue; nothing
/// modifies it after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCardRecord {
    pub card_number: CardNumber,
    pub card_type: CardType,
    /// Opaque chip identifier for readers that report one besides the number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_id: Option<Vec<u8>>,
    /// Punches in the order the card stores them.
    pub punches: Vec<Punch>,
    pub start_time: Option<NaiveDateTime>,
    pub finish_time: Option<NaiveDateTime>,
}

impl RawCardRecord {
    /// Create an empty record for a card.
    #[must_use]
    pub fn new(card_number: CardNumber, card_type: CardType) -> Self {
        RawCardRecord {
            card_number,
            card_type,
            chip_id: None,
            punches: Vec::new(),
            start_time: None,
            finish_time: None,
        }
    }

    #[must_use]
    pub fn with_chip_id(mut self, chip_id: impl Into<Vec<u8>>) -> Self {
        self.chip_id = Some(chip_id.into());
        self
    }

    #[must_use]
    pub fn with_punch(mut self, punch: Punch) -> Self {
        self.punches.push(punch);
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: NaiveDateTime) -> Self {
        self.start_time = Some(start);
        self
    }

    #[must_use]
    pub fn with_finish(mut self, finish: NaiveDateTime) -> Self {
        self.finish_time = Some(finish);
        self
    }

    /// Family of the reader that produced this record.
    #[must_use]
    pub fn family(&self) -> DeviceFamily {
        self.card_type.family()
    }
}

/// One punch as the race store sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSplit {
    /// Station code.
    pub code: u16,
    /// Time of day after clock correction.
    pub time: NaiveTime,
    /// Race day the punch belongs to, counted from the race's zero-time epoch.
    pub day_offset: i32,
}

/// Processing status of a [`DomainResult`].
///
/// Results leave this crate unprocessed; validity rules belong to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ResultStatus {
    #[default]
    Unprocessed,
}

/// A card read converted into domain terms, ready for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResult {
    pub card_number: CardNumber,
    pub card_type: CardType,
    /// Splits in the order the card stored the punches. Never reordered.
    pub splits: Vec<DomainSplit>,
    pub start_time: Option<NaiveTime>,
    pub finish_time: Option<NaiveTime>,
    pub status: ResultStatus,
}

impl DomainResult {
    #[must_use]
    pub fn new(card_number: CardNumber, card_type: CardType) -> Self {
        DomainResult {
            card_number,
            card_type,
            splits: Vec::new(),
            start_time: None,
            finish_time: None,
            status: ResultStatus::Unprocessed,
        }
    }
}

/// Message passed from the acquisition worker to the normalization worker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueCommand {
    /// A card was read completely.
    CardData(RawCardRecord),
}

impl QueueCommand {
    /// Short tag for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            QueueCommand::CardData(_) => "card_data",
        }
    }
}
