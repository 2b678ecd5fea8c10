use super::AgentSession;
use crate::events::current_timestamp_millis;
use crate::{
    ApprovalKind, ApprovalOutcome, MessageCallbacks, PermissionRequest, PlanApprovalRequest,
};
use async_trait::async_trait;
use parley_sdk::{AbortSignal, HookDecision, PermissionMode, PreToolUseHook, PreToolUseRequest};
use serde_json::{Value, json};
use std::sync::Weak;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

const PLAN_EXIT_TOOLS: [&str; 2] = ["ExitPlanMode", "exit_plan_mode"];

pub(crate) fn is_plan_exit_tool(tool_name: &str) -> bool {
    PLAN_EXIT_TOOLS.contains(&tool_name)
}

/// Pre-tool-use hook handed to the remote service for one exchange.
pub(super) struct SessionToolHook {
    session: Weak<AgentSession>,
}

impl SessionToolHook {
    pub(super) fn new(session: Weak<AgentSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PreToolUseHook for SessionToolHook {
    async fn before_tool_use(
        &self,
        request: PreToolUseRequest,
        signal: AbortSignal,
    ) -> HookDecision {
        let Some(session) = self.session.upgrade() else {
            return HookDecision::deny("session closed");
        };
        session.decide_tool_use(request, signal).await
    }
}

impl AgentSession {
    async fn decide_tool_use(&self, request: PreToolUseRequest, signal: AbortSignal) -> HookDecision {
        if is_plan_exit_tool(&request.tool_name) {
            return self.decide_plan_exit(request, signal).await;
        }
        if self.permission_mode() == PermissionMode::BypassAll {
            debug!(tool = %request.tool_name, "bypass mode; allowing tool");
            return HookDecision::allow();
        }

        let Some(callbacks) = self
            .current_callbacks()
            .filter(|callbacks| callbacks.on_permission_request.is_some())
        else {
            info!(
                conversation_id = %self.conversation_id,
                tool = %request.tool_name,
                "no permission sink registered; allowing tool"
            );
            return HookDecision::allow();
        };

        let id = request_id(&request);
        let receiver = self.gate.register(
            id.clone(),
            ApprovalKind::Permission,
            json!({"tool": request.tool_name, "input": request.tool_input}),
        );
        callbacks.notify_permission_request(PermissionRequest {
            id: id.clone(),
            tool: request.tool_name.clone(),
            action: describe_action(&request.tool_name, &request.tool_input),
            details: request.tool_input.clone(),
            timestamp: current_timestamp_millis(),
        });

        match self.await_approval(&id, receiver, signal).await {
            Some(Ok(response)) if response.approved => {
                HookDecision::allow_with_input(response.updated_input)
            }
            Some(Ok(_)) => HookDecision::deny("User denied permission"),
            Some(Err(rejected)) => HookDecision::deny(rejected.to_string()),
            // The exchange is being torn down; it no longer reads the decision.
            None => std::future::pending().await,
        }
    }

    async fn decide_plan_exit(&self, request: PreToolUseRequest, signal: AbortSignal) -> HookDecision {
        let plan = request
            .tool_input
            .get("plan")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(callbacks) = self
            .current_callbacks()
            .filter(|callbacks| callbacks.on_plan_approval_request.is_some())
        else {
            info!(
                conversation_id = %self.conversation_id,
                "no plan approval sink registered; approving plan"
            );
            self.set_permission_mode(PermissionMode::AcceptEdits);
            return HookDecision::allow();
        };

        let id = request_id(&request);
        let receiver = self
            .gate
            .register(id.clone(), ApprovalKind::Plan, json!({"plan": plan}));
        callbacks.notify_plan_approval_request(PlanApprovalRequest {
            id: id.clone(),
            plan,
            timestamp: current_timestamp_millis(),
        });

        match self.await_approval(&id, receiver, signal).await {
            Some(Ok(response)) if response.approved => {
                self.set_permission_mode(PermissionMode::AcceptEdits);
                HookDecision::allow()
            }
            Some(Ok(_)) => HookDecision::deny("User rejected the plan"),
            Some(Err(rejected)) => HookDecision::deny(rejected.to_string()),
            None => std::future::pending().await,
        }
    }

    /// Wait on the gate against both the service's signal and the signal of
    /// the current loop run. Nothing resolves once either has fired.
    async fn await_approval(
        &self,
        id: &str,
        receiver: oneshot::Receiver<ApprovalOutcome>,
        signal: AbortSignal,
    ) -> Option<ApprovalOutcome> {
        let run = self.interrupt.signal();
        let outcome = self.gate.wait(id, receiver, &signal).await?;
        if run.is_aborted() {
            debug!(request_id = %id, "approval outcome dropped after interrupt");
            return None;
        }
        Some(outcome)
    }

    fn current_callbacks(&self) -> Option<MessageCallbacks> {
        let active = self.active_batch();
        active
            .callbacks
            .get(active.cursor)
            .or_else(|| active.callbacks.last())
            .cloned()
    }
}

fn request_id(request: &PreToolUseRequest) -> String {
    request
        .tool_use_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// One-line description of a tool call for the approval prompt.
pub(crate) fn describe_action(tool_name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match tool_name {
        "Bash" => match field("command") {
            Some(command) => format!("Run command: {command}"),
            None => "Run a shell command".to_string(),
        },
        "Write" => match field("file_path") {
            Some(path) => format!("Write file: {path}"),
            None => "Write a file".to_string(),
        },
        "Edit" | "MultiEdit" => match field("file_path") {
            Some(path) => format!("Edit file: {path}"),
            None => "Edit a file".to_string(),
        },
        "Read" => match field("file_path") {
            Some(path) => format!("Read file: {path}"),
            None => "Read a file".to_string(),
        },
        "WebFetch" => match field("url") {
            Some(url) => format!("Fetch URL: {url}"),
            None => "Fetch a URL".to_string(),
        },
        other => format!("Use tool: {other}"),
    }
}
