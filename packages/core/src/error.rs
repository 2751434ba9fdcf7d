use std::fmt;
use std::error::Error;

use thiserror::Error as ThisError;

/// Unified application error for startup and wiring code.
///
/// This ensures all layers (config, network, storage)
/// fail in a predictable and debuggable way.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    Network(String),
    Storage(String),
    Unknown(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Config error: {}", msg),
            AppError::Network(msg) => write!(f, "Network error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl Error for AppError {}

/// Errors that can occur while ingesting and analysing a sensor batch.
///
/// Validation and auth failures are terminal for the current operation and
/// surfaced verbatim to the caller. Persistence failures are recovered
/// inside the pipeline (logged, the other store continues). Internal errors
/// are caught at the per-message boundary so one bad message cannot take
/// down a session.
#[derive(ThisError, Debug)]
pub enum PipelineError {
    #[error("Invalid {sensor_type} reading: {message} (field: {field})")]
    Validation {
        sensor_type: String,
        field: String,
        message: String,
    },

    #[error("Invalid device credentials")]
    Auth,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn validation(
        sensor_type: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            sensor_type: sensor_type.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
