//! Error types for device construction and the driver protocol.

use hcc_core::HvacMode;
use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Setup-time device errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Value out of range for {what}: {value}")]
    OutOfRange { what: &'static str, value: f64 },

    #[error("Mode {mode} is not supported by {device}")]
    UnsupportedMode { device: String, mode: HvacMode },

    #[error("Device {device} is closed")]
    Closed { device: String },
}

impl From<hcc_core::CoreError> for DeviceError {
    fn from(err: hcc_core::CoreError) -> Self {
        match err {
            hcc_core::CoreError::OutOfRange { what, value }
            | hcc_core::CoreError::NonFinite { what, value } => DeviceError::OutOfRange { what, value },
            hcc_core::CoreError::InvalidArg { what }
            | hcc_core::CoreError::SignalInvariant { what }
            | hcc_core::CoreError::Unknown { what, .. } => DeviceError::InvalidArg { what },
        }
    }
}

/// Failure reported by a transport driver, classified so the device can
/// decide between retry and give-up without knowing the transport.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    #[error("transient driver failure: {0}")]
    Transient(String),

    #[error("fatal driver failure: {0}")]
    Fatal(String),
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Fatal(_))
    }
}
