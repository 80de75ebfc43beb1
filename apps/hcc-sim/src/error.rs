use hcc_controls::ControlError;
use hcc_devices::DeviceError;
use hcc_model::ModelError;
use hcc_registry::RegistryError;
use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scenario parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid scenario: {0}")]
    Invalid(String),

    #[error("{kind} {id} not found")]
    Missing { kind: &'static str, id: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
