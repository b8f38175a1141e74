//! Error types for the harness.

use std::time::Duration;

/// Top-level error type for the harness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device command errors.
///
/// `Transient` is only returned once the retry budget is spent; every other
/// variant is surfaced on the first failure.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Device {device} unreachable after {attempts} attempts: {last_error}")]
    Transient {
        device: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Command `{command}` failed on {device}: {stderr}")]
    Command {
        device: String,
        command: String,
        stderr: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },
}

impl ConnectionError {
    /// Whether the failure was a connectivity problem rather than a bad command.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// One-shot action errors.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action {name} not found")]
    NotFound { name: String },

    #[error("Action {name} failed to load: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Invalid parameters for action {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Action {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Action {name} device error: {source}")]
    Device {
        name: String,
        #[source]
        source: ConnectionError,
    },
}

/// Background worker errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {name} not found")]
    NotFound { name: String },

    #[error("Worker {name} failed to load: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Invalid parameters for worker {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Worker {name} crashed: {reason}")]
    Crash { name: String, reason: String },

    #[error("Worker device error: {0}")]
    Device(#[from] ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn crash(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Crash {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Report sink errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the harness.
pub type Result<T> = std::result::Result<T, Error>;
