//! Per-message callback capability sets.

use crate::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

pub type TextSink = Arc<dyn Fn(&str) + Send + Sync>;
pub type ToolSink = Arc<dyn Fn(&str, &Value) + Send + Sync>;
pub type PermissionSink = Arc<dyn Fn(PermissionRequest) + Send + Sync>;
pub type PlanApprovalSink = Arc<dyn Fn(PlanApprovalRequest) + Send + Sync>;
pub type SignalSink = Arc<dyn Fn() + Send + Sync>;

/// Tool approval shown to a human.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub tool: String,
    pub action: String,
    pub details: Value,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanApprovalRequest {
    pub id: String,
    pub plan: String,
    pub timestamp: u64,
}

/// Sinks supplied by the caller of one `send`. Every sink is optional; a
/// panicking sink is logged and never aborts the processing loop.
#[derive(Clone, Default)]
pub struct MessageCallbacks {
    pub on_token: Option<TextSink>,
    pub on_thinking: Option<TextSink>,
    pub on_tool_use: Option<ToolSink>,
    pub on_tool_result: Option<ToolSink>,
    pub on_permission_request: Option<PermissionSink>,
    pub on_plan_approval_request: Option<PlanApprovalSink>,
    pub on_interrupted: Option<SignalSink>,
    pub on_result: Option<SignalSink>,
}

impl MessageCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_token(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Arc::new(sink));
        self
    }

    pub fn on_thinking(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_thinking = Some(Arc::new(sink));
        self
    }

    pub fn on_tool_use(mut self, sink: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_tool_use = Some(Arc::new(sink));
        self
    }

    pub fn on_tool_result(mut self, sink: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_tool_result = Some(Arc::new(sink));
        self
    }

    pub fn on_permission_request(
        mut self,
        sink: impl Fn(PermissionRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_permission_request = Some(Arc::new(sink));
        self
    }

    pub fn on_plan_approval_request(
        mut self,
        sink: impl Fn(PlanApprovalRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_plan_approval_request = Some(Arc::new(sink));
        self
    }

    pub fn on_interrupted(mut self, sink: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_interrupted = Some(Arc::new(sink));
        self
    }

    pub fn on_result(mut self, sink: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(sink));
        self
    }

    pub(crate) fn notify_token(&self, text_so_far: &str) {
        if let Some(sink) = &self.on_token {
            guarded("on_token", || sink(text_so_far));
        }
    }

    pub(crate) fn notify_thinking(&self, text: &str) {
        if let Some(sink) = &self.on_thinking {
            guarded("on_thinking", || sink(text));
        }
    }

    pub(crate) fn notify_tool_use(&self, name: &str, input: &Value) {
        if let Some(sink) = &self.on_tool_use {
            guarded("on_tool_use", || sink(name, input));
        }
    }

    pub(crate) fn notify_tool_result(&self, name: &str, result: &Value) {
        if let Some(sink) = &self.on_tool_result {
            guarded("on_tool_result", || sink(name, result));
        }
    }

    /// Returns false when no permission sink is registered.
    pub(crate) fn notify_permission_request(&self, request: PermissionRequest) -> bool {
        let Some(sink) = &self.on_permission_request else {
            return false;
        };
        guarded("on_permission_request", || sink(request));
        true
    }

    /// Returns false when no plan approval sink is registered.
    pub(crate) fn notify_plan_approval_request(&self, request: PlanApprovalRequest) -> bool {
        let Some(sink) = &self.on_plan_approval_request else {
            return false;
        };
        guarded("on_plan_approval_request", || sink(request));
        true
    }

    pub(crate) fn notify_interrupted(&self) {
        if let Some(sink) = &self.on_interrupted {
            guarded("on_interrupted", || sink());
        }
    }

    pub(crate) fn notify_result(&self) {
        if let Some(sink) = &self.on_result {
            guarded("on_result", || sink());
        }
    }
}

impl fmt::Debug for MessageCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCallbacks")
            .field("has_on_token", &self.on_token.is_some())
            .field("has_on_thinking", &self.on_thinking.is_some())
            .field("has_on_tool_use", &self.on_tool_use.is_some())
            .field("has_on_tool_result", &self.on_tool_result.is_some())
            .field(
                "has_on_permission_request",
                &self.on_permission_request.is_some(),
            )
            .field(
                "has_on_plan_approval_request",
                &self.on_plan_approval_request.is_some(),
            )
            .field("has_on_interrupted", &self.on_interrupted.is_some())
            .field("has_on_result", &self.on_result.is_some())
            .finish()
    }
}

fn guarded(sink: &str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        let error = AgentError::Callback(sink.to_string());
        warn!(error = %error, "callback sink failed; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn missing_sinks_are_skipped_and_reported() {
        let callbacks = MessageCallbacks::new();
        callbacks.notify_token("hello");
        callbacks.notify_result();
        assert!(!callbacks.notify_permission_request(PermissionRequest {
            id: "p1".to_string(),
            tool: "Bash".to_string(),
            action: "Run command".to_string(),
            details: Value::Null,
            timestamp: 0,
        }));
    }

    #[test]
    fn panicking_sink_does_not_propagate() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callbacks = MessageCallbacks::new()
            .on_result(|| panic!("sink exploded"))
            .on_token(move |text| {
                seen_clone
                    .lock()
                    .expect("mutex poisoned")
                    .push(text.to_string())
            });

        callbacks.notify_result();
        callbacks.notify_token("still delivered");
        assert_eq!(
            *seen.lock().expect("mutex poisoned"),
            vec!["still delivered".to_string()]
        );
    }

    #[test]
    fn debug_lists_registered_sinks() {
        let callbacks = MessageCallbacks::new().on_interrupted(|| {});
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("has_on_interrupted: true"));
        assert!(debug.contains("has_on_token: false"));
    }
}
