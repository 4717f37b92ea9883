//! The punch readout pipeline.
//!
//! Turns a punch reader into a stream of domain results:
//!
//! 1. [`acquisition::AcquisitionWorker`] polls the reader on a blocking
//!    thread and enqueues every card that was read completely.
//! 2. [`normalization::NormalizationWorker`] takes records off the queue,
//!    corrects 12-hour clock times ([`correction`]), maps them to
//!    [`DomainResult`](punchlink_core::DomainResult)s for the registered
//!    callback and hands the raw record to the [`backup`] writer.
//! 3. [`controller::ReadoutController`] owns both workers of one device
//!    family and exposes start, stop, toggle and liveness.
//!
//! The queue between the two workers is unbounded: a slow callback delays
//! delivery but never the physical read loop.

pub mod acquisition;
pub mod backup;
pub mod config;
pub mod controller;
pub mod correction;
pub mod error;
pub mod lifecycle;
pub mod normalization;

pub use config::PipelineConfig;
pub use controller::{ControllerRegistry, ControllerStatus, ReadoutController};
pub use error::{ReadoutError, Result};
pub use lifecycle::WorkerState;
pub use normalization::{ResultCallback, normalize};
