//! Mock devices for testing without hardware.
//!
//! Each mock comes with a handle that scripts it from the test side:
//! byte-level [`MockTransport`] and report-level [`MockHidLink`] exercise the
//! real adapters, while [`MockPunchReader`] stands in for a whole adapter.

pub mod hid;
pub mod reader;
pub mod transport;

pub use hid::{MockHidHandle, MockHidLink};
pub use reader::{MockPunchReader, MockReaderHandle};
pub use transport::{MockTransport, MockTransportHandle};
