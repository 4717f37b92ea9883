//! SPORTident BSM/BSF master station in direct mode.
//!
//! The station pushes an event frame when a card is inserted or removed, so
//! presence polling only listens; nothing is sent until a card shows up.

use chrono::Local;
use punchlink_core::{
    CardType, DeviceFamily, RawCardRecord,
    constants::{
        PRESENCE_POLL_TIMEOUT_MS,
        sportident::{ACK, CMD_READ_SI5, CMD_SET_MS},
    },
};
use punchlink_protocol::{
    SportidentCodec,
    sportident::{Command, StationEvent, decode_si5, si5_memory},
};
use std::{thread, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    HardwareError, PunchReader, Result,
    config::ReaderConfig,
    transport::{FramedLink, Transport},
};

/// Reader for a SPORTident station over a [`Transport`].
#[derive(Debug)]
pub struct SportidentReader<T> {
    link: FramedLink<T, SportidentCodec>,
    config: ReaderConfig,
    connected: bool,
    /// Baud rate the handshake succeeded at.
    baud: Option<u32>,
    /// Card announced by the last insertion event, not yet read.
    inserted: Option<CardType>,
}

impl<T: Transport> SportidentReader<T> {
    /// A disconnected reader. Call [`PunchReader::connect`] before use.
    pub fn new(transport: T, config: ReaderConfig) -> Self {
        let debug = config.debug;
        Self {
            link: FramedLink::new(transport, SportidentCodec::new(), debug),
            config,
            connected: false,
            baud: None,
            inserted: None,
        }
    }

    /// Baud rate of the current connection.
    pub fn baud(&self) -> Option<u32> {
        self.baud
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
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

    /// Open at `baud` and ask for direct mode.
    fn try_baud(&mut self, baud: u32) -> Result<bool> {
        self.link.transport_mut().open(baud)?;
        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }

        let request = Command::set_direct_mode().encode()?;
        match self.link.exchange(&request, self.config.timeout) {
            Ok(response) if response.code == CMD_SET_MS => Ok(true),
            Ok(response) => {
                debug!(port = self.link.name(), baud, code = response.code, "unexpected handshake answer");
                Ok(false)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!(port = self.link.name(), baud, error = %err, "no handshake");
                Ok(false)
            }
        }
    }

    fn read_si5(&mut self) -> Result<RawCardRecord> {
        let request = Command::read_si5().encode()?;
        // Keep buffered input: a removal event may already be waiting.
        self.link.send(&request)?;

        let response = self.link.receive(self.config.timeout)?;
        match StationEvent::from_response(&response) {
            Some(StationEvent::CardRemoved) => Err(HardwareError::CardChangedDuringRead),
            Some(StationEvent::CardInserted(card_type)) => {
                // A new card replaced the one being read; the next poll reports it.
                self.inserted = Some(card_type);
                Err(HardwareError::CardChangedDuringRead)
            }
            None if response.code == CMD_READ_SI5 => {
                let memory = si5_memory(&response.data)?;
                Ok(decode_si5(memory, Local::now().date_naive())?)
            }
            None => Err(HardwareError::violation(format!(
                "unexpected answer {response} to SI5 read"
            ))),
        }
    }
}

impl<T: Transport> PunchReader for SportidentReader<T> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Sportident
    }

    fn connect(&mut self) -> Result<()> {
        self.config.validate()?;
        self.inserted = None;

        for baud in self.config.baud_rates.clone() {
            if self.try_baud(baud)? {
                info!(port = self.link.name(), baud, "SPORTident station connected");
                self.baud = Some(baud);
                self.connected = true;
                return Ok(());
            }
            self.link.transport_mut().close();
        }

        Err(HardwareError::transport(
            self.link.name(),
            format!(
                "station did not answer at any of {:?} baud",
                self.config.baud_rates
            ),
        ))
    }

    fn poll_presence(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        // The station announces each card once; a swap seen mid-read is still pending.
        if self.inserted.is_some() {
            return Ok(true);
        }
        let timeout = self
            .config
            .timeout
            .min(Duration::from_millis(PRESENCE_POLL_TIMEOUT_MS));

        let received = self.link.receive(timeout);
        let response = match self.guard(received) {
            Ok(response) => response,
            Err(HardwareError::Timeout { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        match StationEvent::from_response(&response) {
            Some(StationEvent::CardInserted(card_type)) => {
                debug!(card_type = %card_type, "card inserted");
                self.inserted = Some(card_type);
                Ok(true)
            }
            Some(StationEvent::CardRemoved) => {
                self.inserted = None;
                Ok(false)
            }
            None => {
                warn!(response = %response, "ignoring unsolicited frame");
                Ok(false)
            }
        }
    }

    fn read_record(&mut self) -> Result<RawCardRecord> {
        self.ensure_connected()?;
        let card_type = self.inserted.take().ok_or(HardwareError::CardNotFound)?;
        if card_type != CardType::Si5 {
            return Err(HardwareError::unsupported_card(card_type));
        }

        let read = self.read_si5();
        self.guard(read)
    }

    fn acknowledge(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let sent = self.link.send(&[ACK]);
        self.guard(sent)
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(port = self.link.name(), "disconnecting SPORTident station");
        }
        self.connected = false;
        self.baud = None;
        self.inserted = None;
        self.link.transport_mut().close();
    }

    fn is_connected(&self) -> bool {
        self.connected && self.link.transport().is_open()
    }
}
