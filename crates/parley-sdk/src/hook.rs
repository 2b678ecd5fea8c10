use crate::AbortSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call the remote service is about to execute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreToolUseRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

impl PreToolUseRequest {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
            tool_use_id: None,
        }
    }

    pub fn with_tool_use_id(mut self, id: impl Into<String>) -> Self {
        self.tool_use_id = Some(id.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// Hook reply. `continue` is always true: a denial only skips the one tool
/// call, the exchange itself keeps running.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    #[serde(rename = "continue")]
    pub continue_exchange: bool,
    pub decision: PermissionDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
}

impl HookDecision {
    pub fn allow() -> Self {
        Self::allow_with_input(None)
    }

    pub fn allow_with_input(updated_input: Option<Value>) -> Self {
        Self {
            continue_exchange: true,
            decision: PermissionDecision::Allow,
            reason: None,
            updated_input,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            continue_exchange: true,
            decision: PermissionDecision::Deny,
            reason: Some(reason.into()),
            updated_input: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == PermissionDecision::Allow
    }
}

/// Called by the remote service immediately before it executes a tool.
///
/// The service suspends only its own tool path while awaiting the decision;
/// other events of the exchange keep flowing. `signal` is the exchange's
/// cancellation signal.
#[async_trait]
pub trait PreToolUseHook: Send + Sync {
    async fn before_tool_use(
        &self,
        request: PreToolUseRequest,
        signal: AbortSignal,
    ) -> HookDecision;
}

#[derive(Debug, Default)]
pub struct AllowAllHook;

#[async_trait]
impl PreToolUseHook for AllowAllHook {
    async fn before_tool_use(
        &self,
        _request: PreToolUseRequest,
        _signal: AbortSignal,
    ) -> HookDecision {
        HookDecision::allow()
    }
}
