//! Driver status codes.
//!
//! Transmitter drivers report failures as small negative integers. [`DriverError`]
//! is the closed set of those codes; success is represented by `Ok(())` rather
//! than a variant.

use thiserror::Error;

/// Failure reported by a transmitter driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DriverError {
    /// A parameter was out of range or a handle was invalid.
    #[error("invalid parameter")]
    InvalidParam,
    /// The device is gone or was never opened.
    #[error("no device")]
    NoDevice,
    /// The requested entity (device index, running transfer) was not found.
    #[error("not found")]
    NotFound,
    /// The device or transfer engine is already in use.
    #[error("resource busy")]
    Busy,
    /// The driver timed out waiting for the device.
    #[error("operation timed out")]
    Timeout,
    /// The driver could not allocate transfer memory.
    #[error("insufficient memory")]
    NoMem,
}

impl DriverError {
    pub const INVALID_PARAM: i32 = -1;
    pub const NO_DEVICE: i32 = -2;
    pub const NOT_FOUND: i32 = -5;
    pub const BUSY: i32 = -6;
    pub const TIMEOUT: i32 = -7;
    pub const NO_MEM: i32 = -11;

    /// Maps a raw driver return value to a result.
    ///
    /// Non-negative values are success. Negative codes outside the known set
    /// are reported as [`DriverError::InvalidParam`], which is what the device
    /// library returns for everything it does not classify further.
    pub fn check(code: i32) -> Result<(), DriverError> {
        match code {
            c if c >= 0 => Ok(()),
            Self::NO_DEVICE => Err(Self::NoDevice),
            Self::NOT_FOUND => Err(Self::NotFound),
            Self::BUSY => Err(Self::Busy),
            Self::TIMEOUT => Err(Self::Timeout),
            Self::NO_MEM => Err(Self::NoMem),
            _ => Err(Self::InvalidParam),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::InvalidParam => Self::INVALID_PARAM,
            Self::NoDevice => Self::NO_DEVICE,
            Self::NotFound => Self::NOT_FOUND,
            Self::Busy => Self::BUSY,
            Self::Timeout => Self::TIMEOUT,
            Self::NoMem => Self::NO_MEM,
        }
    }

    /// Stable identifier used in diagnostics, e.g. `FL2K_ERROR_BUSY`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParam => "FL2K_ERROR_INVALID_PARAM",
            Self::NoDevice => "FL2K_ERROR_NO_DEVICE",
            Self::NotFound => "FL2K_ERROR_NOT_FOUND",
            Self::Busy => "FL2K_ERROR_BUSY",
            Self::Timeout => "FL2K_ERROR_TIMEOUT",
            Self::NoMem => "FL2K_ERROR_NO_MEM",
        }
    }
}

/// Renders a raw driver return value for logs, `FL2K_SUCCESS` included.
pub fn describe_code(code: i32) -> &'static str {
    match DriverError::check(code) {
        Ok(()) => "FL2K_SUCCESS",
        Err(error) => error.as_str(),
    }
}
