//! Request/response readers that are polled by asking for the card.
//!
//! Sportiduino and SRPid stations have no card-inserted event. Presence is
//! detected by sending a read request with a short timeout: a timeout or a
//! "card read error" answer means the reader is empty, a card data answer
//! means a card is there and has already been read in full.

use bytes::Bytes;
use punchlink_core::{
    CardNumber, DeviceFamily, RawCardRecord, constants::PRESENCE_POLL_TIMEOUT_MS,
};
use punchlink_protocol::{frame::hex, Response};
use std::{marker::PhantomData, thread, time::Duration};
use tracing::{debug, info};

use crate::{
    HardwareError, PunchReader, Result,
    config::ReaderConfig,
    transport::{FrameCodec, FramedLink, Transport},
};

/// Wire vocabulary of a polled station.
pub trait PolledProtocol: Send + 'static {
    type Codec: FrameCodec + Default;

    const FAMILY: DeviceFamily;

    fn version_request() -> Result<Bytes>;

    /// Validate a version answer and return its payload.
    fn check_version(response: Response) -> Result<Bytes>;

    fn read_request() -> Result<Bytes>;

    /// Decode a read answer. `Ok(None)` when the station reports no card.
    fn decode_card(response: Response) -> Result<Option<RawCardRecord>>;

    fn beep_request() -> Result<Bytes>;
}

/// Reader for a [`PolledProtocol`] station over a [`Transport`].
#[derive(Debug)]
pub struct PolledReader<T, P: PolledProtocol> {
    link: FramedLink<T, P::Codec>,
    config: ReaderConfig,
    connected: bool,
    /// Card read by the last successful poll, not yet handed out.
    pending: Option<RawCardRecord>,
    /// Card handed out last, while it stays on the reader.
    last_card: Option<CardNumber>,
    protocol: PhantomData<P>,
}

impl<T: Transport, P: PolledProtocol> PolledReader<T, P> {
    /// A disconnected reader. Call [`PunchReader::connect`] before use.
    pub fn new(transport: T, config: ReaderConfig) -> Self {
        let debug = config.debug;
        Self {
            link: FramedLink::new(transport, P::Codec::default(), debug),
            config,
            connected: false,
            pending: None,
            last_card: None,
            protocol: PhantomData,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    fn presence_timeout(&self) -> Duration {
        self.config
            .timeout
            .min(Duration::from_millis(PRESENCE_POLL_TIMEOUT_MS))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(HardwareError::transport(self.link.name(), "not connected"))
        }
    }

    /// Drop the connection on fatal errors and pass the error on.
    fn guard<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.disconnect();
        }
        result
    }

    fn handshake(&mut self) -> Result<Bytes> {
        let request = P::version_request()?;
        let response = self.link.exchange(&request, self.config.timeout)?;
        P::check_version(response)
    }

    fn read_card(&mut self, timeout: Duration) -> Result<Option<RawCardRecord>> {
        let request = P::read_request()?;
        let exchanged = self.link.exchange(&request, timeout);
        match self.guard(exchanged) {
            Ok(response) => P::decode_card(response),
            Err(HardwareError::Timeout { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T: Transport, P: PolledProtocol> PunchReader for PolledReader<T, P> {
    fn family(&self) -> DeviceFamily {
        P::FAMILY
    }

    fn connect(&mut self) -> Result<()> {
        self.config.validate()?;
        let baud = self.config.primary_baud()?;
        self.link.transport_mut().open(baud)?;

        if !self.config.settle_delay.is_zero() {
            debug!(port = self.link.name(), delay = ?self.config.settle_delay, "waiting for station reset");
            thread::sleep(self.config.settle_delay);
        }

        match self.handshake() {
            Ok(version) => {
                info!(family = %P::FAMILY, port = self.link.name(), baud, version = %hex(&version), "station connected");
                self.connected = true;
                self.pending = None;
                self.last_card = None;
                Ok(())
            }
            Err(err) => {
                self.link.transport_mut().close();
                Err(HardwareError::transport(
                    self.link.name(),
                    format!("no answer to version request: {err}"),
                ))
            }
        }
    }

    fn poll_presence(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        match self.read_card(self.presence_timeout())? {
            None => {
                self.pending = None;
                self.last_card = None;
                Ok(false)
            }
            Some(record) if Some(record.card_number) == self.last_card => Ok(false),
            Some(record) => {
                self.pending = Some(record);
                Ok(true)
            }
        }
    }

    fn read_record(&mut self) -> Result<RawCardRecord> {
        self.ensure_connected()?;
        let record = match self.pending.take() {
            Some(record) => record,
            None => self
                .read_card(self.config.timeout)?
                .ok_or(HardwareError::CardNotFound)?,
        };
        self.last_card = Some(record.card_number);
        Ok(record)
    }

    fn acknowledge(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let request = P::beep_request()?;
        let sent = self.link.send(&request);
        self.guard(sent)
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!(family = %P::FAMILY, port = self.link.name(), "disconnecting");
        }
        self.connected = false;
        self.pending = None;
        self.link.transport_mut().close();
    }

    fn is_connected(&self) -> bool {
        self.connected && self.link.transport().is_open()
    }
}
