use serde::Serialize;
use thiserror::Error;

/// Errors from the gateway admin API or the data plane
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdminError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("admin API rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl AdminError {
    /// Transient failures are worth another attempt; rejections are not
    pub fn is_transient(&self) -> bool {
        match self {
            AdminError::Transport(_) | AdminError::Timeout(_) => true,
            AdminError::Status { status, .. } => *status >= 500,
            AdminError::Unauthorized(_) | AdminError::Decode(_) => false,
        }
    }
}

/// State could not be read for one resource
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("could not observe {resource} after {attempts} attempt(s): {reason}")]
pub struct ObserverError {
    pub resource: String,
    pub attempts: u32,
    pub reason: String,
}

/// Errors from the container runtime CLI
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("no container runtime found (docker or podman)")]
    NotInstalled,

    #[error("`{command}` timed out")]
    Timeout { command: String },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(String),
}

/// Main error type for gateway-doctor
#[derive(Error, Debug)]
pub enum DoctorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Invalid issue transition: {0}")]
    TransitionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
