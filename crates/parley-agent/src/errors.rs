use parley_sdk::SdkError;
use thiserror::Error;

/// Top-level error type for the parley-agent crate.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Non-cancellation failure of an exchange; reaches `send()` callers.
    #[error("remote agent service error: {0}")]
    Service(#[from] SdkError),
    /// Cancellation. Recovered inside the loop and surfaced only as
    /// `on_interrupted`.
    #[error("exchange interrupted")]
    Interrupted,
    #[error("processing loop exceeded {iterations} iterations; queue preserved")]
    SafetyGuardTripped { iterations: usize },
    #[error("callback sink '{0}' panicked")]
    Callback(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
    #[error("conversation store error: {0}")]
    Store(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("event sink error: {0}")]
    EventSink(String),
}

impl AgentError {
    pub fn session_closed() -> Self {
        Self::SessionClosed
    }
}

impl From<crate::StoreError> for AgentError {
    fn from(error: crate::StoreError) -> Self {
        Self::Store(error.to_string())
    }
}
