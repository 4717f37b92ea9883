//! Punch reader adapters, one per hardware family.

pub mod polled;
pub mod sfr;
pub mod sportident;
pub mod sportiduino;
pub mod srpid;

pub use polled::{PolledProtocol, PolledReader};
pub use sfr::SfrReader;
pub use sportident::SportidentReader;
pub use sportiduino::SportiduinoReader;
pub use srpid::SrpidReader;
