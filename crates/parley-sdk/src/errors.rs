//! Error taxonomy for the remote agent service.

use thiserror::Error;

/// Failure reported by (or while talking to) the remote agent service.
///
/// Cloneable so one failed exchange can be reported to every message it
/// carried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("exchange closed: {0}")]
    Closed(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SdkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(error: serde_json::Error) -> Self {
        Self::Protocol(error.to_string())
    }
}
