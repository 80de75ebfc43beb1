//! Registry errors.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} registry is closed, can't register {key}")]
    AfterClose { kind: String, key: String },

    #[error("{kind} {key} is already registered")]
    Duplicate { kind: String, key: String },
}
