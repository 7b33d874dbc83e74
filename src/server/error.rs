//! Errors surfaced across the coordinator's remote boundary.
//!
//! Every variant carries a human-readable reason built from the original
//! cause. Internal errors are translated here and never cross the boundary
//! as-is.

use thiserror::Error;

use crate::monitor::{MonitorError, MonitorId};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {reason}")]
    Configuration { reason: String },

    #[error("Failed to create monitor: {reason}")]
    MonitorCreation { reason: String },

    #[error("Monitor id = {id} not found")]
    MonitorNotFound { id: MonitorId },

    #[error("Monitor id = {id} failed to {operation}: {reason}")]
    MonitorOperation {
        id: MonitorId,
        operation: &'static str,
        reason: String,
    },

    #[error("File {reference} not found: {reason}")]
    FileNotFound { reference: String, reason: String },

    #[error("Failed to access {reference}: {reason}")]
    FileAccess { reference: String, reason: String },

    #[error("Failed to compute content hash of {reference}: {reason}")]
    HashComputation { reference: String, reason: String },
}

impl ServerError {
    /// Translate a monitor construction failure.
    ///
    /// Configuration problems are creation failures too; the reason keeps
    /// the distinction readable.
    pub fn creation(error: MonitorError) -> Self {
        let reason = if error.is_configuration() {
            format!("invalid configuration: {error}")
        } else {
            error.to_string()
        };
        ServerError::MonitorCreation { reason }
    }

    pub fn operation(id: &MonitorId, operation: &'static str, error: MonitorError) -> Self {
        ServerError::MonitorOperation {
            id: id.clone(),
            operation,
            reason: error.to_string(),
        }
    }

    /// Translate an I/O failure against a file reference.
    pub fn io(reference: impl ToString, error: &std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            ServerError::FileNotFound {
                reference: reference.to_string(),
                reason: error.to_string(),
            }
        } else {
            ServerError::FileAccess {
                reference: reference.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
