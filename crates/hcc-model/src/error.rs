//! Setup-time errors for zones, thermostats, economizers and unit directors.

use hcc_controls::ControlError;
use hcc_core::{CoreError, HvacMode};
use hcc_devices::DeviceError;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Setpoint {setpoint} is outside of {min}..{max}")]
    SetpointOutOfRange { setpoint: f64, min: f64, max: f64 },

    #[error("Mode {mode} is not supported by {entity}")]
    UnsupportedMode { entity: String, mode: HvacMode },

    #[error("Duplicate zone: {zone}")]
    DuplicateZone { zone: String },

    #[error("Unknown {what}: {value}")]
    Unknown { what: &'static str, value: String },

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl From<CoreError> for ModelError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unknown { what, value } => ModelError::Unknown { what, value },
            other => ModelError::Control(other.into()),
        }
    }
}
