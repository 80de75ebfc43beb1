//! Error types for process controller configuration.

use thiserror::Error;

/// Result type for controller operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors raised while configuring a controller. Runtime input problems are
/// carried in signal status instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a control function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Non-finite number where a real one is required.
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },
}

impl From<hcc_core::CoreError> for ControlError {
    fn from(err: hcc_core::CoreError) -> Self {
        match err {
            hcc_core::CoreError::NonFinite { what, value } => ControlError::NonFinite { what, value },
            hcc_core::CoreError::InvalidArg { what }
            | hcc_core::CoreError::OutOfRange { what, .. }
            | hcc_core::CoreError::SignalInvariant { what }
            | hcc_core::CoreError::Unknown { what, .. } => ControlError::InvalidArg { what },
        }
    }
}
