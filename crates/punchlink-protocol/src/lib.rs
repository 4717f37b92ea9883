//! Byte-level framing for punch readers.
//!
//! This crate performs no I/O. It turns bytes into frames and frames into
//! card records for four wire protocols:
//!
//! - [`sportident`]: extended protocol frames protected by a CRC-16
//! - [`sportiduino`]: sum-checked frames with continuation fragments
//! - [`srpid`]: fixed-size requests, length-prefixed responses
//! - [`sfr`]: 64-byte HID reports correlated by an echoed sub-code
//!
//! The serial protocols share one [`StreamParser`] parameterized by a
//! [`FrameLayout`], and expose `tokio_util` codecs on top of it so the same
//! framing works over a blocking port or a `Framed` stream.

pub mod checksum;
pub mod error;
pub mod frame;
pub mod sfr;
pub mod sportident;
pub mod sportiduino;
pub mod srpid;
pub mod stream_parser;
pub mod time;

pub use error::{ProtocolError, Result};
pub use frame::{FrameLayout, RawFrame, Response};
pub use sportident::SportidentCodec;
pub use sportiduino::SportiduinoCodec;
pub use srpid::SrpidCodec;
pub use stream_parser::{DrainFrames, ParserState, StreamParser};
