//! Scripted in-process agent service for tests and local hosts.

use crate::{
    AbortSignal, AgentService, Exchange, ExchangeControl, ExchangeOptions, HookDecision,
    OutboundTurn, OutboundTurnStream, PermissionMode, PluginConfig, PreToolUseHook,
    PreToolUseRequest, SdkError, ServiceEvent,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Emit one event on the exchange stream.
    Emit { event: ServiceEvent },
    /// Ask the pre-tool-use hook and record its decision before moving on.
    ToolUse { request: PreToolUseRequest },
    /// Stay open until the exchange is aborted, stopped or dropped.
    Hang,
    /// End the stream with a transport error.
    Fail { message: String },
}

pub type ExchangeScript = Vec<ScriptStep>;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedExchange {
    pub model: String,
    pub working_directory: PathBuf,
    pub permission_mode: PermissionMode,
    pub resume: Option<String>,
    pub fork_session: bool,
    pub plugins: Vec<PluginConfig>,
    pub turns: Vec<OutboundTurn>,
    pub decisions: Vec<(PreToolUseRequest, HookDecision)>,
}

#[derive(Default)]
struct ScriptedState {
    scripts: VecDeque<ExchangeScript>,
    recorded: Vec<RecordedExchange>,
}

/// Replays one queued script per opened exchange and records what it was
/// sent.
#[derive(Clone, Default)]
pub struct ScriptedAgentService {
    inner: Arc<Mutex<ScriptedState>>,
    interrupts: Arc<AtomicUsize>,
    unresponsive_stop: bool,
}

impl ScriptedAgentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchanges<I>(scripts: I) -> Self
    where
        I: IntoIterator<Item = ExchangeScript>,
    {
        let service = Self::default();
        for script in scripts {
            service.push_exchange(script);
        }
        service
    }

    /// Parse a JSON array of exchange scripts.
    pub fn from_json_str(source: &str) -> Result<Self, SdkError> {
        let scripts: Vec<ExchangeScript> = serde_json::from_str(source)?;
        Ok(Self::with_exchanges(scripts))
    }

    /// Make stop requests hang forever, like a wedged remote process.
    pub fn with_unresponsive_stop(mut self) -> Self {
        self.unresponsive_stop = true;
        self
    }

    pub fn push_exchange(&self, script: ExchangeScript) {
        self.state().scripts.push_back(script);
    }

    pub fn remaining_exchanges(&self) -> usize {
        self.state().scripts.len()
    }

    pub fn recorded(&self) -> Vec<RecordedExchange> {
        self.state().recorded.clone()
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScriptedState> {
        self.inner.lock().expect("scripted service mutex poisoned")
    }
}

#[async_trait]
impl AgentService for ScriptedAgentService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_exchange(
        &self,
        options: ExchangeOptions,
        turns: OutboundTurnStream,
        signal: AbortSignal,
    ) -> Result<Exchange, SdkError> {
        let (index, script) = {
            let mut state = self.state();
            let script = state
                .scripts
                .pop_front()
                .ok_or_else(|| SdkError::closed("no scripted exchange remaining"))?;
            state.recorded.push(RecordedExchange {
                model: options.model.clone(),
                working_directory: options.working_directory.clone(),
                permission_mode: options.permission_mode,
                resume: options.resume.clone(),
                fork_session: options.fork_session,
                plugins: options.plugins.clone(),
                turns: Vec::new(),
                decisions: Vec::new(),
            });
            (state.recorded.len() - 1, script)
        };

        let stop = AbortSignal::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = ScriptDriver {
            inner: self.inner.clone(),
            index,
            hook: options.pre_tool_use.clone(),
            signal,
            stop: stop.clone(),
            events: tx,
        };
        tokio::spawn(driver.run(script, turns));

        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Exchange {
            events: Box::pin(events),
            control: Arc::new(ScriptedControl {
                stop,
                interrupts: self.interrupts.clone(),
                unresponsive: self.unresponsive_stop,
            }),
        })
    }
}

struct ScriptDriver {
    inner: Arc<Mutex<ScriptedState>>,
    index: usize,
    hook: Arc<dyn PreToolUseHook>,
    signal: AbortSignal,
    stop: AbortSignal,
    events: mpsc::UnboundedSender<Result<ServiceEvent, SdkError>>,
}

impl ScriptDriver {
    async fn run(self, script: ExchangeScript, turns: OutboundTurnStream) {
        let turns: Vec<OutboundTurn> = turns.collect().await;
        self.record(|exchange| exchange.turns = turns);

        for step in script {
            if self.signal.is_aborted() || self.stop.is_aborted() {
                debug!(index = self.index, "scripted exchange halted");
                return;
            }
            match step {
                ScriptStep::Emit { event } => {
                    if self.events.send(Ok(event)).is_err() {
                        return;
                    }
                }
                ScriptStep::ToolUse { request } => {
                    let decision = tokio::select! {
                        biased;
                        decision = self.hook.before_tool_use(request.clone(), self.signal.clone()) => decision,
                        _ = self.signal.aborted() => return,
                        _ = self.stop.aborted() => return,
                    };
                    self.record(|exchange| exchange.decisions.push((request, decision)));
                }
                ScriptStep::Hang => {
                    tokio::select! {
                        _ = self.signal.aborted() => {}
                        _ = self.stop.aborted() => {}
                        _ = self.events.closed() => {}
                    }
                    return;
                }
                ScriptStep::Fail { message } => {
                    let _ = self.events.send(Err(SdkError::transport(message)));
                    return;
                }
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut RecordedExchange)) {
        let mut state = self.inner.lock().expect("scripted service mutex poisoned");
        if let Some(exchange) = state.recorded.get_mut(self.index) {
            update(exchange);
        }
    }
}

struct ScriptedControl {
    stop: AbortSignal,
    interrupts: Arc<AtomicUsize>,
    unresponsive: bool,
}

#[async_trait]
impl ExchangeControl for ScriptedControl {
    async fn interrupt(&self) -> Result<(), SdkError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.unresponsive {
            std::future::pending::<()>().await;
        }
        self.stop.abort();
        Ok(())
    }
}
