use crate::AgentError;
use parley_sdk::PluginConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Runtime configuration shared by every session of a pool.
///
/// Reloads are applied lazily: a running exchange keeps the configuration it
/// was opened with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    /// Upper bound on loop iterations without a fully completed exchange.
    pub max_loop_iterations: usize,
    /// Bound on the advisory stop request sent to the remote service.
    pub interrupt_timeout_ms: u64,
    pub plugins: Vec<PluginConfig>,
    pub mcp_servers: Option<Value>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub include_partial_messages: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_loop_iterations: 50,
            interrupt_timeout_ms: 1_000,
            plugins: Vec::new(),
            mcp_servers: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            include_partial_messages: true,
        }
    }
}

impl SessionConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_millis(self.interrupt_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if self.max_loop_iterations == 0 {
            return Err(AgentError::InvalidConfiguration(
                "max_loop_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AgentError::InvalidConfiguration(format!(
                "failed reading config '{}': {error}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            AgentError::InvalidConfiguration(format!(
                "failed parsing config '{}': {error}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }
}
