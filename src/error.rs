// src/error.rs - Error taxonomy shared by the peripheral registries
use thiserror::Error;

/// Failure reported by a peripheral registry operation.
///
/// Reads that have a defined default (an unconfigured GPIO pin reads `Low`,
/// an unconfigured ADC channel reads `0`) never produce one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("peripheral has not been initialized")]
    Uninitialized,
    #[error("pin or channel has not been configured")]
    NotConfigured,
    #[error("pin is not configured as an output")]
    WrongMode,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

impl From<serde_json::Error> for PeripheralError {
    fn from(err: serde_json::Error) -> Self {
        PeripheralError::MalformedSnapshot(err.to_string())
    }
}

pub type PeripheralResult<T> = Result<T, PeripheralError>;
