//! Typed errors for the streaming engine.
//!
//! [`StreamError`] is the single public error type. The transient stream
//! conditions ([`StreamError::Timeout`], [`StreamError::Underflow`],
//! [`StreamError::Overflow`]) are ordinary control flow that callers are
//! expected to handle and retry; everything else is a caller or setup bug.

use fl2k_driver::DriverError;
use thiserror::Error;

use crate::config::Direction;
use crate::format::{Component, SampleFormat};

/// Errors produced by stream setup, lifecycle and data-path operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No slot (or no fault notice) became available within the wait budget.
    #[error("timed out waiting for the stream")]
    Timeout,
    /// The transmitter ran out of data to send.
    #[error("transmit underflow")]
    Underflow,
    /// The writer produced faster than the transmitter drained.
    #[error("transmit overflow")]
    Overflow,
    /// A flag or mode the engine does not implement was requested.
    #[error("not supported: {what}")]
    NotSupported {
        /// Name of the unsupported request.
        what: &'static str,
    },
    /// The engine only transmits.
    #[error("unsupported stream direction {direction:?}")]
    UnsupportedDirection {
        /// Direction requested at setup.
        direction: Direction,
    },
    /// Sample format name is not one of the supported formats.
    #[error("unsupported sample format '{name}'")]
    UnsupportedFormat {
        /// Format name as given by the caller.
        name: String,
    },
    /// Channel selection is empty, repeats a channel, or exceeds the device.
    #[error("invalid channel selection {selection:?} for a {available}-channel device")]
    InvalidChannelSelection {
        /// Requested driver channel indices.
        selection: Vec<usize>,
        /// Channels exposed by the device.
        available: usize,
    },
    /// Buffer length is zero or not a multiple of the driver alignment.
    #[error("buffer length {len} must be a positive multiple of {alignment} bytes")]
    InvalidBufferLength {
        /// Requested bytes per channel buffer.
        len: usize,
        /// Alignment required by the driver.
        alignment: usize,
    },
    /// The device only transmits buffers of one fixed length.
    #[error("buffer length {len} differs from the {required} bytes the device transmits")]
    BufferLengthMismatch {
        /// Requested bytes per channel buffer.
        len: usize,
        /// Length every device transfer consumes.
        required: usize,
    },
    /// Buffer length does not hold a whole number of native elements.
    #[error("buffer length {len} is not a multiple of the {element_bytes}-byte {format} element")]
    MisalignedElement {
        /// Requested bytes per channel buffer.
        len: usize,
        /// Native bytes per element of the format.
        element_bytes: usize,
        /// Configured format.
        format: SampleFormat,
    },
    /// Ring needs one slot for the driver and one for the writer.
    #[error(
        "buffer count must be at least {min}, got {count}",
        min = crate::config::MIN_BUFFER_COUNT
    )]
    InvalidBufferCount {
        /// Requested ring slot count.
        count: usize,
    },
    /// Operation is not valid in the current session state.
    #[error("cannot {operation} while the stream is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Session state name at the time of the call.
        state: &'static str,
    },
    /// Typed write used a sample type other than the configured format's.
    #[error("stream is configured for {configured} but {requested:?} samples were written")]
    FormatMismatch {
        /// Format selected at setup.
        configured: SampleFormat,
        /// Component type of the written samples.
        requested: Component,
    },
    /// Number of input buffers does not match the configured channels.
    #[error("expected {expected} channel buffers, got {actual}")]
    ChannelCountMismatch {
        /// Channels configured at setup.
        expected: usize,
        /// Buffers supplied by the caller.
        actual: usize,
    },
    /// Handle is not the oldest outstanding writer handle.
    #[error("slot handle {index} is not the oldest outstanding writer slot")]
    InvalidHandle {
        /// Ring index carried by the rejected handle.
        index: usize,
    },
    /// The transmit helper thread could not be spawned.
    #[error("failed to spawn transmit thread: {source}")]
    SpawnTxThread {
        /// I/O error returned by thread spawn.
        #[source]
        source: std::io::Error,
    },
    /// The transmit helper thread ended while the stream was active.
    #[error("transmitter is no longer running")]
    TransmitterStopped,
    /// The transmit helper thread panicked.
    #[error("transmit thread panicked")]
    TxThreadPanicked,
    /// Wrapped transmitter driver failure.
    #[error("driver error: {0} ({code})", code = .0.as_str())]
    Driver(#[from] DriverError),
}

impl StreamError {
    pub const STATUS_TIMEOUT: i32 = -1;
    pub const STATUS_STREAM_ERROR: i32 = -2;
    pub const STATUS_OVERFLOW: i32 = -4;
    pub const STATUS_NOT_SUPPORTED: i32 = -5;
    pub const STATUS_UNDERFLOW: i32 = -7;

    /// Conventional SDR status code, for callers bridging to C-style APIs.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Timeout => Self::STATUS_TIMEOUT,
            Self::Overflow => Self::STATUS_OVERFLOW,
            Self::Underflow => Self::STATUS_UNDERFLOW,
            Self::NotSupported { .. } | Self::UnsupportedDirection { .. } => {
                Self::STATUS_NOT_SUPPORTED
            },
            _ => Self::STATUS_STREAM_ERROR,
        }
    }

    /// `true` for the conditions that occur during normal streaming and are
    /// resolved by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Underflow | Self::Overflow)
    }
}
