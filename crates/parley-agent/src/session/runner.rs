use super::hook::SessionToolHook;
use super::types::{QueuedMessage, SendOutcome, SessionState};
use super::AgentSession;
use crate::{AgentError, LifecycleEvent, Reconciled, StreamAccumulator, compose_turn};
use futures::StreamExt;
use parley_sdk::{
    AbortSignal, AssistantBlock, BlockDelta, ExchangeOptions, OutboundTurnStream, SdkError,
    ServiceEvent, StreamPayload, ToolProgressStatus,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How one exchange ended, with the batch messages that never got a result.
enum ExchangeOutcome {
    Completed,
    Incomplete(Vec<QueuedMessage>),
    Interrupted(Vec<QueuedMessage>),
    Failed(Vec<QueuedMessage>, SdkError),
}

impl AgentSession {
    pub(super) async fn run_loop(self: Arc<Self>, signal: AbortSignal) {
        self.emit(LifecycleEvent::ProcessingStarted);
        let mut iterations = 0usize;

        loop {
            if signal.is_aborted() {
                break;
            }
            let batch = {
                let mut core = self.core();
                if core.queue.is_empty() {
                    self.leave_processing(SessionState::Idle);
                    drop(core);
                    self.report_complete(SessionState::Idle, 0);
                    return;
                }
                let limit = core.config.max_loop_iterations;
                if iterations >= limit {
                    let error = AgentError::SafetyGuardTripped { iterations };
                    let remaining = core.queue.len();
                    warn!(
                        conversation_id = %self.conversation_id,
                        error = %error,
                        queued = remaining,
                        "processing halted; call resume_processing to continue"
                    );
                    self.leave_processing(SessionState::Idle);
                    drop(core);
                    self.report_complete(SessionState::Idle, remaining);
                    return;
                }
                core.queue.drain(..).collect::<Vec<_>>()
            };
            iterations += 1;

            match self.run_exchange(batch, &signal).await {
                ExchangeOutcome::Completed => iterations = 0,
                ExchangeOutcome::Incomplete(unanswered) => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        unanswered = unanswered.len(),
                        "exchange ended before every message got a result; retrying"
                    );
                    let mut core = self.core();
                    for message in unanswered.into_iter().rev() {
                        core.queue.push_front(message);
                    }
                }
                ExchangeOutcome::Interrupted(mut unanswered) => {
                    for message in &mut unanswered {
                        message.interrupt();
                    }
                    break;
                }
                ExchangeOutcome::Failed(mut unanswered, error) => {
                    warn!(
                        conversation_id = %self.conversation_id,
                        error = %error,
                        failed_messages = unanswered.len(),
                        "exchange failed"
                    );
                    let error = AgentError::from(error);
                    for message in &mut unanswered {
                        message.settle(Err(error.clone()));
                    }
                }
            }
        }

        let (notices, remaining, restart) = {
            let mut core = self.core();
            let cutoff = core.interrupt_cutoff;
            let notices: Vec<_> = core
                .queue
                .iter_mut()
                .filter(|message| message.seq < cutoff)
                .filter_map(QueuedMessage::take_interrupt)
                .collect();
            self.leave_processing(SessionState::Interrupted);
            // Messages that arrived while this run wound down start the next one.
            let late = core.queue.iter().any(|message| message.seq >= cutoff);
            let restart = if late { self.try_start(&core) } else { None };
            (notices, core.queue.len(), restart)
        };
        for notice in notices {
            notice.deliver();
        }
        info!(
            conversation_id = %self.conversation_id,
            preserved = remaining,
            "processing interrupted"
        );
        self.report_complete(SessionState::Interrupted, remaining);
        if let Some(signal) = restart {
            debug!(
                conversation_id = %self.conversation_id,
                "messages queued after the interrupt; starting a new run"
            );
            self.spawn_loop(signal);
        }
    }

    /// Leave Processing. Called with the core lock held so a concurrent
    /// enqueue either lands in this run or starts the next one.
    fn leave_processing(&self, state: SessionState) {
        self.active_batch().callbacks.clear();
        self.state.send_replace(state);
        self.finished_runs.send_modify(|runs| *runs += 1);
    }

    fn report_complete(&self, state: SessionState, remaining_messages: usize) {
        self.emit(LifecycleEvent::ProcessingComplete {
            interrupted: state == SessionState::Interrupted,
            remaining_messages,
        });
    }

    async fn run_exchange(
        self: &Arc<Self>,
        mut batch: Vec<QueuedMessage>,
        signal: &AbortSignal,
    ) -> ExchangeOutcome {
        let options = self.exchange_options();
        {
            let mut active = self.active_batch();
            active.callbacks = batch.iter().map(|m| m.callbacks.clone()).collect();
            active.cursor = 0;
        }
        debug!(
            conversation_id = %self.conversation_id,
            batch = batch.len(),
            resume = ?options.resume,
            fork = options.fork_session,
            "opening exchange"
        );

        let drafts: Vec<_> = batch
            .iter()
            .map(|m| (m.text.clone(), m.attachments.clone()))
            .collect();
        let turns: OutboundTurnStream = Box::pin(
            futures::stream::iter(drafts)
                .then(|(text, attachments)| compose_turn(text, attachments)),
        );

        let opened = tokio::select! {
            biased;
            _ = signal.aborted() => None,
            opened = self.service.open_exchange(options, turns, signal.clone()) => Some(opened),
        };
        let mut exchange = match opened {
            None => return ExchangeOutcome::Interrupted(batch),
            Some(Err(_)) if signal.is_aborted() => return ExchangeOutcome::Interrupted(batch),
            Some(Err(error)) => return ExchangeOutcome::Failed(batch, error),
            Some(Ok(exchange)) => exchange,
        };
        self.interrupt.attach(exchange.control.clone());

        let mut accumulator = StreamAccumulator::new();
        let mut cursor = 0usize;
        let ended: Result<(), SdkError> = loop {
            if cursor >= batch.len() {
                break Ok(());
            }
            let next = tokio::select! {
                biased;
                _ = signal.aborted() => {
                    self.interrupt.detach();
                    return ExchangeOutcome::Interrupted(batch.split_off(cursor));
                }
                next = exchange.events.next() => next,
            };
            match next {
                None => break Ok(()),
                Some(Err(error)) => break Err(error),
                Some(Ok(event)) => {
                    cursor = self.dispatch(event, &mut batch, cursor, &mut accumulator);
                }
            }
        };
        self.interrupt.detach();

        if signal.is_aborted() {
            return ExchangeOutcome::Interrupted(batch.split_off(cursor));
        }
        let unanswered = batch.split_off(cursor);
        match ended {
            Err(error) => ExchangeOutcome::Failed(unanswered, error),
            Ok(()) if unanswered.is_empty() => ExchangeOutcome::Completed,
            Ok(()) => ExchangeOutcome::Incomplete(unanswered),
        }
    }

    fn exchange_options(self: &Arc<Self>) -> ExchangeOptions {
        let mut core = self.core();
        if let Some(config) = core.pending_config.take() {
            debug!(
                conversation_id = %self.conversation_id,
                model = %config.model,
                "applying reloaded configuration"
            );
            core.config = config;
        }
        // A fork resumes its parent until the service hands out its own id.
        let (resume, fork_session) = match (&core.external_session_id, &core.parent_session_id) {
            (Some(id), _) => (Some(id.clone()), false),
            (None, Some(parent)) => (Some(parent.clone()), true),
            (None, None) => (None, false),
        };
        let config = &core.config;
        ExchangeOptions {
            model: config.model.clone(),
            working_directory: self.working_directory.clone(),
            permission_mode: self.permission_mode(),
            resume,
            fork_session,
            plugins: config.plugins.clone(),
            mcp_servers: config.mcp_servers.clone(),
            allowed_tools: config.allowed_tools.clone(),
            disallowed_tools: config.disallowed_tools.clone(),
            include_partial_messages: config.include_partial_messages,
            pre_tool_use: Arc::new(SessionToolHook::new(Arc::downgrade(self))),
        }
    }

    /// Route one event to the current slot. Returns the next slot index.
    fn dispatch(
        &self,
        event: ServiceEvent,
        batch: &mut [QueuedMessage],
        cursor: usize,
        accumulator: &mut StreamAccumulator,
    ) -> usize {
        if let Some(session_id) = event.session_id() {
            self.observe_session_id(session_id);
        }
        let callbacks = &batch[cursor].callbacks;

        match event {
            ServiceEvent::Assistant { content, .. } => {
                for (block_index, block) in content.iter().enumerate() {
                    match block {
                        AssistantBlock::Text { text } => {
                            match accumulator.reconcile(cursor, block_index, text) {
                                Reconciled::Nothing => {}
                                Reconciled::Suffix { total, .. } => callbacks.notify_token(&total),
                                Reconciled::Full(text) => callbacks.notify_token(&text),
                            }
                        }
                        AssistantBlock::Thinking { thinking } => {
                            callbacks.notify_thinking(thinking)
                        }
                        AssistantBlock::ToolUse { name, input, .. } => {
                            callbacks.notify_tool_use(name, input)
                        }
                        AssistantBlock::Other => {
                            debug!(block_index, "unrecognized assistant block")
                        }
                    }
                }
                cursor
            }
            ServiceEvent::StreamEvent {
                event: StreamPayload::ContentBlockDelta { index, delta },
                ..
            } => {
                if let BlockDelta::TextDelta { text } = delta {
                    let total = accumulator.push_delta(cursor, index, &text);
                    callbacks.notify_token(total);
                }
                cursor
            }
            ServiceEvent::StreamEvent { .. } => cursor,
            ServiceEvent::ToolProgress {
                tool_name,
                status,
                output,
                ..
            } => {
                let output = output.unwrap_or(Value::Null);
                match status {
                    ToolProgressStatus::Running => callbacks.notify_tool_use(&tool_name, &output),
                    ToolProgressStatus::Completed => {
                        callbacks.notify_tool_result(&tool_name, &output)
                    }
                }
                cursor
            }
            ServiceEvent::Result {
                subtype, is_error, ..
            } => {
                if is_error {
                    warn!(
                        conversation_id = %self.conversation_id,
                        slot = cursor,
                        subtype = ?subtype,
                        "service reported an error result"
                    );
                }
                callbacks.notify_result();
                accumulator.clear_slot(cursor);
                batch[cursor].settle(Ok(SendOutcome::Completed));
                let next = cursor + 1;
                self.active_batch().cursor = next;
                next
            }
            ServiceEvent::System { subtype, .. } => {
                debug!(
                    conversation_id = %self.conversation_id,
                    subtype = ?subtype,
                    "system event"
                );
                cursor
            }
            ServiceEvent::Unknown => {
                debug!(conversation_id = %self.conversation_id, "unrecognized event");
                cursor
            }
        }
    }

    fn observe_session_id(&self, session_id: &str) {
        let changed = {
            let mut core = self.core();
            if core.external_session_id.as_deref() == Some(session_id) {
                false
            } else {
                core.external_session_id = Some(session_id.to_string());
                true
            }
        };
        if changed {
            info!(
                conversation_id = %self.conversation_id,
                session_id,
                "external session id updated"
            );
            self.emit(LifecycleEvent::SessionIdChanged {
                session_id: session_id.to_string(),
            });
        }
    }
}
