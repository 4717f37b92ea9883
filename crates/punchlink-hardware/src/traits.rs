//! The punch reader capability trait.
//!
//! Every hardware family exposes the same small set of operations to the
//! acquisition worker. Operations block on device I/O, each bounded by the
//! protocol timeout of the adapter, so the worker drives a reader from a
//! blocking thread.

use punchlink_core::{DeviceFamily, RawCardRecord};

use crate::error::Result;

/// Uniform interface over a physical punch reader.
///
/// # Lifecycle
///
/// A reader is created disconnected. [`connect`](PunchReader::connect) opens
/// the transport and performs the family handshake. After a
/// `HardwareError::TransportFailure` the reader is disconnected and stays
/// that way until `connect` or [`reconnect`](PunchReader::reconnect) is
/// called again; no operation retries on its own.
///
/// # Reading a card
///
/// ```no_run
/// use punchlink_hardware::{PunchReader, Result};
/// use punchlink_core::RawCardRecord;
///
/// fn read_one<R: PunchReader>(reader: &mut R) -> Result<Option<RawCardRecord>> {
///     if !reader.poll_presence()? {
///         return Ok(None);
///     }
///     let record = reader.read_record()?;
///     reader.acknowledge()?;
///     Ok(Some(record))
/// }
/// ```
pub trait PunchReader: Send {
    fn family(&self) -> DeviceFamily;

    /// Open the transport and handshake with the station.
    ///
    /// # Errors
    /// `HardwareError::TransportFailure` if the device cannot be opened or
    /// never answers the handshake.
    fn connect(&mut self) -> Result<()>;

    /// Returns `true` when a card that has not been read yet is on the reader.
    ///
    /// A card that stays on the reader after a successful read is reported
    /// once; removing it re-arms detection.
    fn poll_presence(&mut self) -> Result<bool>;

    /// Read the whole card.
    ///
    /// # Errors
    /// - `HardwareError::CardChangedDuringRead` if the card left the reader
    ///   before the read completed; nothing of the partial read is returned
    /// - `HardwareError::CardNotFound` if no card is present
    /// - `HardwareError::UnsupportedCardType` for cards the family cannot decode
    fn read_record(&mut self) -> Result<RawCardRecord>;

    /// Audible or visual confirmation of a successful read.
    fn acknowledge(&mut self) -> Result<()>;

    /// Close the transport. Safe to call when already disconnected.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// `disconnect` followed by `connect`.
    fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        self.connect()
    }
}
