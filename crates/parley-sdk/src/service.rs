//! Remote agent service contract.

use crate::{
    AbortSignal, OutboundTurn, PermissionMode, PluginConfig, PreToolUseHook, SdkError,
    ServiceEvent,
};
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

pub type ServiceEventStream = Pin<Box<dyn Stream<Item = Result<ServiceEvent, SdkError>> + Send>>;

/// Outbound turns for one exchange. Produced lazily; the transport pulls
/// turns as it is ready to send them.
pub type OutboundTurnStream = Pin<Box<dyn Stream<Item = OutboundTurn> + Send>>;

/// Parameters for opening one streaming exchange.
#[derive(Clone)]
pub struct ExchangeOptions {
    pub model: String,
    pub working_directory: PathBuf,
    pub permission_mode: PermissionMode,
    /// Session to resume. On a fork's first exchange this is the parent's id.
    pub resume: Option<String>,
    pub fork_session: bool,
    pub plugins: Vec<PluginConfig>,
    pub mcp_servers: Option<Value>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub include_partial_messages: bool,
    pub pre_tool_use: Arc<dyn PreToolUseHook>,
}

impl fmt::Debug for ExchangeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeOptions")
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .field("permission_mode", &self.permission_mode)
            .field("resume", &self.resume)
            .field("fork_session", &self.fork_session)
            .field("plugins", &self.plugins)
            .field("mcp_servers", &self.mcp_servers)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("include_partial_messages", &self.include_partial_messages)
            .finish_non_exhaustive()
    }
}

/// Out-of-band control for a running exchange.
#[async_trait]
pub trait ExchangeControl: Send + Sync {
    /// Advisory stop request. Callers bound it with a timeout and do not rely
    /// on it for correctness.
    async fn interrupt(&self) -> Result<(), SdkError>;
}

pub struct Exchange {
    pub events: ServiceEventStream,
    pub control: Arc<dyn ExchangeControl>,
}

#[async_trait]
pub trait AgentService: Send + Sync {
    fn name(&self) -> &str;

    /// Open one exchange carrying `turns`. `signal` is forwarded to the
    /// pre-tool-use hook and ends the exchange when fired.
    async fn open_exchange(
        &self,
        options: ExchangeOptions,
        turns: OutboundTurnStream,
        signal: AbortSignal,
    ) -> Result<Exchange, SdkError>;
}
