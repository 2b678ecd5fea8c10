use crate::{
    AgentError, Attachment, ConversationRecord, EventEmitter, InterruptController,
    LifecycleEvent, MessageCallbacks, PermissionGate, SessionConfig, SessionEvent,
};
use parley_sdk::{AbortSignal, AgentService, PermissionMode};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

mod hook;
mod runner;
mod types;
pub use types::{MessageTicket, SendOutcome, SessionState};
use types::QueuedMessage;

pub(crate) struct SessionCore {
    external_session_id: Option<String>,
    parent_session_id: Option<String>,
    queue: VecDeque<QueuedMessage>,
    next_seq: u64,
    /// Messages enqueued before this sequence number were queued when the
    /// last interrupt fired.
    interrupt_cutoff: u64,
    config: SessionConfig,
    pending_config: Option<SessionConfig>,
}

/// Callbacks of the batch currently streaming and the slot being answered.
#[derive(Default)]
pub(crate) struct ActiveBatch {
    callbacks: Vec<MessageCallbacks>,
    cursor: usize,
}

/// One conversation with the remote agent service.
///
/// Messages are queued and drained by a single processing loop task that
/// runs at most one exchange at a time. The loop is started by `enqueue` or
/// `resume_processing` and exits once the queue is empty, the session is
/// interrupted, or the iteration guard trips.
pub struct AgentSession {
    conversation_id: String,
    working_directory: PathBuf,
    service: Arc<dyn AgentService>,
    emitter: Arc<dyn EventEmitter>,
    gate: PermissionGate,
    interrupt: InterruptController,
    mode: Mutex<PermissionMode>,
    state: watch::Sender<SessionState>,
    /// Bumped each time a loop run leaves Processing.
    finished_runs: watch::Sender<u64>,
    core: Mutex<SessionCore>,
    batch: Mutex<ActiveBatch>,
}

impl AgentSession {
    pub fn new(
        conversation_id: impl Into<String>,
        record: ConversationRecord,
        config: SessionConfig,
        service: Arc<dyn AgentService>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Idle);
        let (finished_runs, _) = watch::channel(0);
        Arc::new(Self {
            conversation_id: conversation_id.into(),
            working_directory: record.working_directory,
            service,
            emitter,
            gate: PermissionGate::new(),
            interrupt: InterruptController::new(),
            mode: Mutex::new(record.permission_mode),
            state,
            finished_runs,
            core: Mutex::new(SessionCore {
                external_session_id: record.external_session_id,
                parent_session_id: record.parent_session_id,
                queue: VecDeque::new(),
                next_seq: 0,
                interrupt_cutoff: 0,
                config,
                pending_config: None,
            }),
            batch: Mutex::new(ActiveBatch::default()),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Queue a message and start the processing loop if it is not running.
    pub fn enqueue(
        self: &Arc<Self>,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        callbacks: MessageCallbacks,
    ) -> MessageTicket {
        let (sender, ticket) = MessageTicket::channel();
        let signal = {
            let mut core = self.core();
            let seq = core.next_seq;
            core.next_seq += 1;
            core.queue.push_back(QueuedMessage {
                seq,
                text: text.into(),
                attachments,
                callbacks,
                ticket: Some(sender),
            });
            debug!(
                conversation_id = %self.conversation_id,
                queued = core.queue.len(),
                "message queued"
            );
            self.try_start(&core)
        };
        if let Some(signal) = signal {
            self.spawn_loop(signal);
        }
        ticket
    }

    /// Queue a message and wait for its outcome.
    pub async fn send(
        self: &Arc<Self>,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        callbacks: MessageCallbacks,
    ) -> Result<SendOutcome, AgentError> {
        self.enqueue(text, attachments, callbacks).wait().await
    }

    /// Restart the loop over a preserved queue. Returns false when the queue
    /// is empty or the loop is already running.
    pub fn resume_processing(self: &Arc<Self>) -> bool {
        let signal = {
            let core = self.core();
            if core.queue.is_empty() {
                return false;
            }
            self.try_start(&core)
        };
        match signal {
            Some(signal) => {
                info!(conversation_id = %self.conversation_id, "resuming processing");
                self.spawn_loop(signal);
                true
            }
            None => false,
        }
    }

    /// Stop the session. The current exchange ends immediately, pending
    /// approvals are rejected, and queued messages stay queued. Waits, up to
    /// the configured interrupt timeout, for the loop to wind down.
    pub async fn interrupt(&self) {
        let (timeout, run_finished) = self.stop_now();
        self.interrupt.request_remote_stop(timeout).await;

        if let Some(mut run_finished) = run_finished {
            if tokio::time::timeout(timeout, run_finished.changed())
                .await
                .is_err()
            {
                warn!(
                    conversation_id = %self.conversation_id,
                    "processing loop still winding down after interrupt"
                );
            }
        }
    }

    /// The synchronous half of `interrupt`. Returns the stop timeout and,
    /// when a loop run was active, a receiver that changes once it exits.
    fn stop_now(&self) -> (Duration, Option<watch::Receiver<u64>>) {
        let (timeout, notices, run_finished) = {
            let mut core = self.core();
            let rejected = self.interrupt.fire(&self.gate);
            core.interrupt_cutoff = core.next_seq;
            let processing = *self.state.borrow() == SessionState::Processing;
            // A running loop notifies its own queue on the way out.
            let notices: Vec<_> = if processing {
                Vec::new()
            } else {
                core.queue
                    .iter_mut()
                    .filter_map(QueuedMessage::take_interrupt)
                    .collect()
            };
            info!(
                conversation_id = %self.conversation_id,
                rejected_approvals = rejected,
                "session interrupted"
            );
            let run_finished = processing.then(|| self.finished_runs.subscribe());
            (core.config.interrupt_timeout(), notices, run_finished)
        };
        for notice in notices {
            notice.deliver();
        }
        self.emit(LifecycleEvent::ClearPermissions);
        (timeout, run_finished)
    }

    pub fn set_permission_mode(&self, mode: PermissionMode) {
        let previous = {
            let mut current = self.mode.lock().expect("permission mode mutex poisoned");
            std::mem::replace(&mut *current, mode)
        };
        debug!(
            conversation_id = %self.conversation_id,
            from = %previous,
            to = %mode,
            "permission mode changed"
        );
        self.emit(LifecycleEvent::ModeChanged { mode });
    }

    pub fn permission_mode(&self) -> PermissionMode {
        *self.mode.lock().expect("permission mode mutex poisoned")
    }

    pub fn respond_to_permission(
        &self,
        request_id: &str,
        approved: bool,
        updated_input: Option<serde_json::Value>,
    ) -> bool {
        self.gate
            .respond_to_permission(request_id, approved, updated_input)
    }

    pub fn respond_to_plan_approval(&self, request_id: &str, approved: bool) -> bool {
        self.gate.respond_to_plan_approval(request_id, approved)
    }

    /// Stage a configuration for the next exchange. A running exchange keeps
    /// its configuration.
    pub fn reload_config(&self, config: SessionConfig) {
        self.core().pending_config = Some(config);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn wait_until_idle(&self) -> SessionState {
        let mut state = self.state.subscribe();
        match state
            .wait_for(|state| *state != SessionState::Processing)
            .await
        {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.core().queue.len()
    }

    pub fn external_session_id(&self) -> Option<String> {
        self.core().external_session_id.clone()
    }

    pub fn parent_session_id(&self) -> Option<String> {
        self.core().parent_session_id.clone()
    }

    pub fn pending_approvals(&self) -> Vec<String> {
        self.gate.pending_ids()
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Flip to Processing under the core lock. Returns the fresh signal for
    /// the new loop run when this call started it.
    fn try_start(&self, _core: &SessionCore) -> Option<AbortSignal> {
        let started = self.state.send_if_modified(|state| {
            if *state == SessionState::Processing {
                return false;
            }
            *state = SessionState::Processing;
            true
        });
        started.then(|| self.interrupt.arm())
    }

    fn spawn_loop(self: &Arc<Self>, signal: AbortSignal) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_loop(signal).await });
    }

    fn emit(&self, event: LifecycleEvent) {
        let name = event.name();
        if let Err(error) = self
            .emitter
            .emit(SessionEvent::new(self.conversation_id.clone(), event))
        {
            warn!(
                conversation_id = %self.conversation_id,
                event = name,
                error = %error,
                "failed to emit session event"
            );
        }
    }

    fn core(&self) -> std::sync::MutexGuard<'_, SessionCore> {
        self.core.lock().expect("session core mutex poisoned")
    }

    fn active_batch(&self) -> std::sync::MutexGuard<'_, ActiveBatch> {
        self.batch.lock().expect("active batch mutex poisoned")
    }
}
