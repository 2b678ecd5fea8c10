#![allow(dead_code)]

use parley_agent::{
    BufferedEventEmitter, ConversationRecord, MemoryConversationStore, MessageCallbacks,
    PermissionRequest, PlanApprovalRequest, SessionConfig, SessionPool,
};
use parley_sdk::testing::{ExchangeScript, ScriptStep, ScriptedAgentService};
use parley_sdk::{PermissionMode, ServiceEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub struct PoolFixture {
    pub pool: Arc<SessionPool>,
    pub service: ScriptedAgentService,
    pub store: MemoryConversationStore,
    pub emitter: BufferedEventEmitter,
}

pub fn pool_fixture(scripts: Vec<ExchangeScript>) -> PoolFixture {
    pool_fixture_with(ScriptedAgentService::with_exchanges(scripts), SessionConfig::default())
}

pub fn pool_fixture_with(service: ScriptedAgentService, config: SessionConfig) -> PoolFixture {
    let store = MemoryConversationStore::new();
    let emitter = BufferedEventEmitter::default();
    let pool = SessionPool::new(
        Arc::new(service.clone()),
        Arc::new(store.clone()),
        Arc::new(emitter.clone()),
        config,
    )
    .expect("pool should build");
    PoolFixture {
        pool: Arc::new(pool),
        service,
        store,
        emitter,
    }
}

impl PoolFixture {
    pub fn add_conversation(&self, conversation_id: &str, mode: PermissionMode) {
        self.store.insert(
            conversation_id,
            ConversationRecord::new("/work").with_permission_mode(mode),
        );
    }
}

pub fn emit(event: ServiceEvent) -> ScriptStep {
    ScriptStep::Emit { event }
}

#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .expect("recorder mutex")
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("recorder mutex").clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Callbacks that record results and interruptions and forward approval
/// requests to channels.
pub struct ApprovalCallbacks {
    pub callbacks: MessageCallbacks,
    pub permissions: mpsc::UnboundedReceiver<PermissionRequest>,
    pub plans: mpsc::UnboundedReceiver<PlanApprovalRequest>,
}

pub fn approval_callbacks(recorder: &Recorder, label: &str) -> ApprovalCallbacks {
    let (permission_tx, permissions) = mpsc::unbounded_channel();
    let (plan_tx, plans) = mpsc::unbounded_channel();
    ApprovalCallbacks {
        callbacks: recording_callbacks(recorder, label)
            .on_permission_request(move |request| {
                let _ = permission_tx.send(request);
            })
            .on_plan_approval_request(move |request| {
                let _ = plan_tx.send(request);
            }),
        permissions,
        plans,
    }
}

pub fn recording_callbacks(recorder: &Recorder, label: &str) -> MessageCallbacks {
    let on_result = (recorder.clone(), format!("{label}:result"));
    let on_interrupted = (recorder.clone(), format!("{label}:interrupted"));
    let on_token = (recorder.clone(), label.to_string());
    MessageCallbacks::new()
        .on_result(move || on_result.0.push(on_result.1.clone()))
        .on_interrupted(move || on_interrupted.0.push(on_interrupted.1.clone()))
        .on_token(move |text| on_token.0.push(format!("{}:token:{text}", on_token.1)))
}
