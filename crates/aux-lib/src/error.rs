//! Error types for admission and reconciliation

use thiserror::Error;

/// Failure to signal the proxy through a remote command
///
/// Both variants are retryable: the next observed event re-runs the
/// readiness check, which refuses to signal an already stopped proxy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The exec session could not be established
    #[error("failed to set up exec session: {0}")]
    SetupFailed(String),
    /// The session was established but the stream or the command failed
    #[error("exec stream failed: {0}")]
    StreamFailed(String),
}

impl ExecutionError {
    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::SetupFailed(_) => "setup",
            ExecutionError::StreamFailed(_) => "stream",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("failed to decode admission object: {0}")]
    Decode(String),

    #[error("failed to merge annotation {key}: {source}")]
    ConfigMerge {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
