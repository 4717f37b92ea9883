//! Punch reader adapters for the punchlink readout pipeline.
//!
//! This crate turns a physical timing station into a [`PunchReader`]: a
//! small blocking interface to connect, poll for a card, read it in full,
//! acknowledge it and disconnect. Four hardware families are supported:
//!
//! | family | transport | adapter |
//! |--------|-----------|---------|
//! | SPORTident | serial, extended protocol | [`readers::SportidentReader`] |
//! | Sportiduino | serial, fragmented frames | [`readers::SportiduinoReader`] |
//! | SRPid | serial, fixed-size requests | [`readers::SrpidReader`] |
//! | SFR | USB HID reports | [`readers::SfrReader`] |
//!
//! # Layers
//!
//! - [`transport::Transport`] and [`hid::HidLink`] move bytes and reports.
//!   Real implementations use `serialport` and `hidapi`; [`mock`] has
//!   scripted ones.
//! - [`readers`] speak each family's protocol on top of a transport, with
//!   framing and decoding delegated to `punchlink-protocol`.
//! - [`devices::AnyPunchReader`] picks the adapter from a
//!   [`config::ReaderConfig`] at runtime.
//! - [`port::PortSelector`] finds a serial port when none is configured.
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T>`] with a [`HardwareError`]. Per-record
//! problems (bad checksum, card pulled early) are
//! [recoverable](HardwareError::is_recoverable); a transport failure is
//! [fatal](HardwareError::is_fatal) and leaves the reader disconnected until
//! it is explicitly reconnected.
//!
//! # Example
//!
//! ```
//! use punchlink_core::{CardNumber, CardType, DeviceFamily, RawCardRecord};
//! use punchlink_hardware::{PunchReader, devices::AnyPunchReader, mock::MockPunchReader};
//!
//! let (reader, handle) = MockPunchReader::new(DeviceFamily::Sportiduino);
//! let mut reader = AnyPunchReader::from(reader);
//! reader.connect()?;
//!
//! handle.present(RawCardRecord::new(CardNumber::new(7)?, CardType::Sportiduino));
//! if reader.poll_presence()? {
//!     let record = reader.read_record()?;
//!     reader.acknowledge()?;
//!     assert_eq!(record.card_number.as_u32(), 7);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod devices;
pub mod error;
pub mod hid;
pub mod mock;
pub mod port;
pub mod readers;
pub mod traits;
pub mod transport;

pub use config::{HidIds, PortSetting, ReaderConfig};
pub use devices::AnyPunchReader;
pub use error::{HardwareError, Result};
pub use port::PortSelector;
pub use traits::PunchReader;
