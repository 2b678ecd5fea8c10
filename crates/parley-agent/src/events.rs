use crate::AgentError;
use parley_sdk::PermissionMode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Session lifecycle notification for the owning application layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    ProcessingStarted,
    ProcessingComplete {
        interrupted: bool,
        remaining_messages: usize,
    },
    ClearPermissions,
    ModeChanged {
        mode: PermissionMode,
    },
    /// The remote service reported a new external session id. Callers persist
    /// it so a later process can resume the conversation.
    SessionIdChanged {
        session_id: String,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessingStarted => "processing-started",
            Self::ProcessingComplete { .. } => "processing-complete",
            Self::ClearPermissions => "clear-permissions",
            Self::ModeChanged { .. } => "mode-changed",
            Self::SessionIdChanged { .. } => "session-id-changed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub conversation_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl SessionEvent {
    pub fn new(conversation_id: impl Into<String>, event: LifecycleEvent) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            timestamp: current_timestamp(),
            event,
        }
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: SessionEvent) -> Result<(), AgentError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct BufferedEventEmitter {
    inner: Arc<Mutex<Vec<SessionEvent>>>,
}

impl BufferedEventEmitter {
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        let guard = self.inner.lock().expect("buffered emitter mutex poisoned");
        guard.clone()
    }

    /// Lifecycle events recorded for one conversation, in emission order.
    pub fn events_for(&self, conversation_id: &str) -> Vec<LifecycleEvent> {
        let guard = self.inner.lock().expect("buffered emitter mutex poisoned");
        guard
            .iter()
            .filter(|event| event.conversation_id == conversation_id)
            .map(|event| event.event.clone())
            .collect()
    }
}

impl EventEmitter for BufferedEventEmitter {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        let mut guard = self.inner.lock().expect("buffered emitter mutex poisoned");
        guard.push(event);
        Ok(())
    }
}

pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Forwards events into an unbounded channel. Fails once the receiver is gone.
#[derive(Clone)]
pub struct ChannelEventEmitter {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl EventEmitter for ChannelEventEmitter {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        self.sender
            .send(event)
            .map_err(|_| AgentError::EventSink("session event receiver dropped".to_string()))
    }
}

pub fn session_event_channel() -> (ChannelEventEmitter, SessionEventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ChannelEventEmitter { sender }, receiver)
}

pub(crate) fn current_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

pub(crate) fn current_timestamp_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_event_emitter_stores_emitted_events() {
        let emitter = BufferedEventEmitter::default();
        emitter
            .emit(SessionEvent::new("c1", LifecycleEvent::ProcessingStarted))
            .expect("emit should succeed");
        emitter
            .emit(SessionEvent::new("c2", LifecycleEvent::ClearPermissions))
            .expect("emit should succeed");

        assert_eq!(emitter.snapshot().len(), 2);
        assert_eq!(
            emitter.events_for("c1"),
            vec![LifecycleEvent::ProcessingStarted]
        );
    }

    #[test]
    fn session_event_serializes_with_kebab_case_kind() {
        let event = SessionEvent {
            conversation_id: "c1".to_string(),
            timestamp: "1700000000".to_string(),
            event: LifecycleEvent::ProcessingComplete {
                interrupted: true,
                remaining_messages: 2,
            },
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "conversation_id": "c1",
                "timestamp": "1700000000",
                "kind": "processing-complete",
                "interrupted": true,
                "remaining_messages": 2
            })
        );
        assert_eq!(event.event.name(), "processing-complete");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn channel_emitter_reports_dropped_receiver() {
        let (emitter, mut receiver) = session_event_channel();
        emitter
            .emit(SessionEvent::new(
                "c1",
                LifecycleEvent::ModeChanged {
                    mode: PermissionMode::Plan,
                },
            ))
            .expect("emit should succeed");
        let received = receiver.recv().await.expect("event should arrive");
        assert_eq!(received.event.name(), "mode-changed");

        drop(receiver);
        let error = emitter
            .emit(SessionEvent::new("c1", LifecycleEvent::ClearPermissions))
            .expect_err("emit should fail");
        assert!(matches!(error, AgentError::EventSink(_)));
    }
}
