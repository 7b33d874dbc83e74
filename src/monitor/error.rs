//! Error types for the platform monitor layer.

use std::path::PathBuf;
use thiserror::Error;

use super::types::EventType;

/// Errors from configuring or running a platform monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Event type {event_type} not supported on this platform")]
    UnsupportedEventType { event_type: EventType },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Native watch error: {details}")]
    Native { details: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl MonitorError {
    /// True for failures caused by the requested configuration rather than
    /// by the running watch.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MonitorError::UnsupportedEventType { .. }
                | MonitorError::InitFailed { .. }
                | MonitorError::WatchFailed { .. }
        )
    }
}

impl From<notify::Error> for MonitorError {
    fn from(e: notify::Error) -> Self {
        MonitorError::InitFailed {
            reason: e.to_string(),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
