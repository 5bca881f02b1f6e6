//! fl2k-stream: transmit streaming engine for FL2K dongles.
//!
//! An application writes samples in any supported [`SampleFormat`] through a
//! [`StreamSession`]. Samples are converted to the device's unsigned 8-bit
//! format and queued in a bounded slot ring, from which the driver's transfer
//! callback pulls one buffer per transfer. An empty ring transmits mid-scale.

#![deny(clippy::wildcard_imports)]

pub mod adapter;
pub mod config;
pub mod convert;
pub mod error;
pub mod exchange;
pub mod format;
mod infra;
pub mod logging;
pub mod session;

pub use adapter::HardwareCallbackAdapter;
pub use config::{ArgInfo, ArgKind, Direction, SessionTuning, StreamArgs, StreamConfig};
pub use convert::{FormatConverter, MID_SCALE};
pub use error::StreamError;
pub use exchange::{ExchangeCoordinator, ExchangeStats, FaultKind, Occupancy, SlotHandle};
pub use format::{Component, SampleFormat, TxSample};
pub use logging::init_tracing;
pub use session::{StreamSession, StreamState, WriteBuffer, WriteOutcome};
