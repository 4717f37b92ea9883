//! Shared vocabulary of the punch readout pipeline.
//!
//! Everything that crosses a crate boundary lives here: device families,
//! card records as they come off the wire, the domain results handed to the
//! host, the queue command exchanged between the two workers and the
//! [`RaceClock`] collaborator that supplies the race's zero time.

pub mod clock;
pub mod constants;
pub mod error;
pub mod types;

pub use clock::{FixedRaceClock, RaceClock};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
