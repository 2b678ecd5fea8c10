use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed event emitted by the remote service during an exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        content: Vec<AssistantBlock>,
    },
    StreamEvent {
        #[serde(default)]
        session_id: Option<String>,
        event: StreamPayload,
    },
    ToolProgress {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        tool_use_id: Option<String>,
        tool_name: String,
        status: ToolProgressStatus,
        #[serde(default)]
        output: Option<Value>,
    },
    Result {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Partial-message payload carried by a `stream_event`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPayload {
    ContentBlockDelta { index: usize, delta: BlockDelta },
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProgressStatus {
    Running,
    Completed,
}

impl ServiceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Assistant { .. } => "assistant",
            Self::StreamEvent { .. } => "stream_event",
            Self::ToolProgress { .. } => "tool_progress",
            Self::Result { .. } => "result",
            Self::Unknown => "unknown",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::System { session_id, .. }
            | Self::Assistant { session_id, .. }
            | Self::StreamEvent { session_id, .. }
            | Self::ToolProgress { session_id, .. }
            | Self::Result { session_id, .. } => session_id.as_deref(),
            Self::Unknown => None,
        }
    }

    pub fn system_init(session_id: impl Into<String>) -> Self {
        Self::System {
            subtype: Some("init".to_string()),
            session_id: Some(session_id.into()),
        }
    }

    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        Self::StreamEvent {
            session_id: None,
            event: StreamPayload::ContentBlockDelta {
                index,
                delta: BlockDelta::TextDelta { text: text.into() },
            },
        }
    }

    pub fn assistant(content: Vec<AssistantBlock>) -> Self {
        Self::Assistant {
            session_id: None,
            content,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![AssistantBlock::Text { text: text.into() }])
    }

    pub fn tool_progress(
        tool_name: impl Into<String>,
        status: ToolProgressStatus,
        output: Option<Value>,
    ) -> Self {
        Self::ToolProgress {
            session_id: None,
            tool_use_id: None,
            tool_name: tool_name.into(),
            status,
            output,
        }
    }

    pub fn result() -> Self {
        Self::Result {
            session_id: None,
            subtype: Some("success".to_string()),
            is_error: false,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_text_delta_parses_from_wire_shape() {
        let event: ServiceEvent = serde_json::from_value(serde_json::json!({
            "type": "stream_event",
            "session_id": "sess-1",
            "event": {
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Hel"}
            }
        }))
        .expect("stream event should parse");

        assert_eq!(event.session_id(), Some("sess-1"));
        assert_eq!(
            event,
            ServiceEvent::StreamEvent {
                session_id: Some("sess-1".to_string()),
                event: StreamPayload::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::TextDelta {
                        text: "Hel".to_string()
                    },
                },
            }
        );
    }

    #[test]
    fn unrecognized_event_and_block_types_fall_back_to_catch_all() {
        let event: ServiceEvent =
            serde_json::from_value(serde_json::json!({"type": "rate_limit", "retry": 3}))
                .expect("unknown event should parse");
        assert_eq!(event, ServiceEvent::Unknown);
        assert_eq!(event.session_id(), None);

        let event: ServiceEvent = serde_json::from_value(serde_json::json!({
            "type": "assistant",
            "content": [
                {"type": "text", "text": "hi"},
                {"type": "redacted_thinking", "data": "xyz"}
            ]
        }))
        .expect("assistant event should parse");
        let ServiceEvent::Assistant { content, .. } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(content[1], AssistantBlock::Other);

        let payload: StreamPayload =
            serde_json::from_value(serde_json::json!({"type": "message_start", "message": {}}))
                .expect("message_start should parse");
        assert_eq!(payload, StreamPayload::Other);
    }

    #[test]
    fn result_defaults_missing_fields() {
        let event: ServiceEvent =
            serde_json::from_value(serde_json::json!({"type": "result"})).expect("parse");
        assert_eq!(
            event,
            ServiceEvent::Result {
                session_id: None,
                subtype: None,
                is_error: false,
                result: None,
            }
        );
        assert_eq!(event.kind(), "result");
    }
}
