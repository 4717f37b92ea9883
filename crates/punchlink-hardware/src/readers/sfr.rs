//! SFR USB HID reader.
//!
//! Every exchange is a single rendezvous: stale input reports are dropped,
//! one request report is written, and input reports are consumed until one
//! echoes the request code and position or the timeout runs out. Only one
//! request is ever in flight.

use chrono::Local;
use punchlink_core::{
    DeviceFamily, RawCardRecord,
    constants::{
        PRESENCE_POLL_TIMEOUT_MS,
        sfr::{MIN_BEEP_SPACING_MS, POS_BIB, POS_CARD_ID, POS_COUNT},
    },
};
use punchlink_protocol::{
    frame::hex,
    sfr::{self, CardAssembler, SfrRecord, SfrReport, punch_positions},
};
use std::{
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, trace};

use crate::{HardwareError, PunchReader, Result, config::ReaderConfig, hid::HidLink};

/// Reader for an SFR station over a [`HidLink`].
#[derive(Debug)]
pub struct SfrReader<L> {
    link: L,
    config: ReaderConfig,
    connected: bool,
    /// Card id seen by the last successful poll, not yet read.
    pending: Option<[u8; 4]>,
    /// Card id read last, while it stays on the reader.
    last_card: Option<[u8; 4]>,
    last_beep: Option<Instant>,
}

impl<L: HidLink> SfrReader<L> {
    /// A disconnected reader. Call [`PunchReader::connect`] before use.
    pub fn new(link: L, config: ReaderConfig) -> Self {
        Self {
            link,
            config,
            connected: false,
            pending: None,
            last_card: None,
            last_beep: None,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(HardwareError::transport(self.link.name(), "not connected"))
        }
    }

    fn guard<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.disconnect();
        }
        result
    }

    fn write(&mut self, report: &[u8]) -> Result<()> {
        if self.config.debug {
            trace!(device = self.link.name(), tx = %hex(&report[..7]), "write");
        }
        let written = self.link.write_report(report);
        // Any send failure leaves the device in an unknown state.
        self.guard(written)
    }

    /// Request the record at `position` and wait for its report.
    fn exchange(&mut self, position: u8, timeout: Duration) -> Result<SfrRecord> {
        while self.link.read_report(Duration::ZERO)?.is_some() {}

        let sent = sfr::request(position);
        self.write(&sent)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HardwareError::timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }

            let Some(raw) = self.link.read_report(remaining)? else {
                continue;
            };
            if self.config.debug {
                trace!(device = self.link.name(), rx = %hex(&raw), "report");
            }
            let report = SfrReport::parse(&raw)?;
            if report.answers(&sent) && report.position == position {
                return Ok(report.record);
            }
            trace!(code = report.code, position = report.position, "ignoring unrelated report");
        }
    }

    fn request(&mut self, position: u8, timeout: Duration) -> Result<SfrRecord> {
        let result = self.exchange(position, timeout);
        self.guard(result)
    }

    fn card_id(&mut self, timeout: Duration) -> Result<Option<[u8; 4]>> {
        match self.request(POS_CARD_ID, timeout)? {
            SfrRecord::CardId(id) => Ok(id),
            other => Err(HardwareError::violation(format!(
                "expected card id, got {other:?}"
            ))),
        }
    }
}

impl<L: HidLink> PunchReader for SfrReader<L> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Sfr
    }

    fn connect(&mut self) -> Result<()> {
        self.config.validate()?;
        self.link.open()?;
        self.connected = true;
        self.pending = None;
        self.last_card = None;
        info!(device = self.link.name(), "SFR reader connected");
        Ok(())
    }

    fn poll_presence(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        let timeout = self
            .config
            .timeout
            .min(Duration::from_millis(PRESENCE_POLL_TIMEOUT_MS));

        match self.card_id(timeout)? {
            None => {
                self.pending = None;
                self.last_card = None;
                Ok(false)
            }
            Some(id) if Some(id) == self.last_card => Ok(false),
            Some(id) => {
                debug!(card_id = %hex(&id), "card detected");
                self.pending = Some(id);
                Ok(true)
            }
        }
    }

    fn read_record(&mut self) -> Result<RawCardRecord> {
        self.ensure_connected()?;
        let timeout = self.config.timeout;
        let card_id = match self.pending.take() {
            Some(id) => id,
            None => self.card_id(timeout)?.ok_or(HardwareError::CardNotFound)?,
        };

        let mut card = CardAssembler::new(card_id);
        card.push(self.request(POS_BIB, timeout)?);
        card.push(self.request(POS_COUNT, timeout)?);
        let count = card.count().unwrap_or_default();
        for position in punch_positions(count) {
            card.push(self.request(position, timeout)?);
        }

        if self.card_id(timeout)? != Some(card_id) {
            return Err(HardwareError::CardChangedDuringRead);
        }

        let record = card.finish(Local::now().date_naive())?;
        self.last_card = Some(card_id);
        Ok(record)
    }

    fn acknowledge(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let spacing = Duration::from_millis(MIN_BEEP_SPACING_MS);
        if let Some(elapsed) = self.last_beep.map(|at| at.elapsed())
            && elapsed < spacing
        {
            thread::sleep(spacing - elapsed);
        }
        self.write(&sfr::beep())?;
        self.last_beep = Some(Instant::now());
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(device = self.link.name(), "disconnecting SFR reader");
        }
        self.connected = false;
        self.pending = None;
        self.link.close();
    }

    fn is_connected(&self) -> bool {
        self.connected && self.link.is_open()
    }
}
