use crate::{
    AgentError, AgentSession, Attachment, ConversationStore, EventEmitter, MessageCallbacks,
    MessageTicket, SendOutcome, SessionConfig,
};
use parley_sdk::{AgentService, PermissionMode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// One [`AgentSession`] per conversation, created lazily from the store.
///
/// Sessions share the pool's service, emitter and default configuration.
/// Every lifecycle event a session emits carries its conversation id.
pub struct SessionPool {
    service: Arc<dyn AgentService>,
    store: Arc<dyn ConversationStore>,
    emitter: Arc<dyn EventEmitter>,
    config: Mutex<SessionConfig>,
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
}

impl SessionPool {
    pub fn new(
        service: Arc<dyn AgentService>,
        store: Arc<dyn ConversationStore>,
        emitter: Arc<dyn EventEmitter>,
        config: SessionConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            service,
            store,
            emitter,
            config: Mutex::new(config),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub async fn get_or_create(&self, conversation_id: &str) -> Result<Arc<AgentSession>, AgentError> {
        if let Some(session) = self.session(conversation_id) {
            return Ok(session);
        }

        let record = self
            .store
            .load(conversation_id)
            .await?
            .ok_or_else(|| AgentError::UnknownConversation(conversation_id.to_string()))?;
        let config = self.config().clone();

        let mut sessions = self.sessions();
        let session = sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation_id, "creating session");
                AgentSession::new(
                    conversation_id,
                    record,
                    config,
                    self.service.clone(),
                    self.emitter.clone(),
                )
            });
        Ok(session.clone())
    }

    pub fn session(&self, conversation_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions().get(conversation_id).cloned()
    }

    pub async fn enqueue(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        callbacks: MessageCallbacks,
    ) -> Result<MessageTicket, AgentError> {
        let session = self.get_or_create(conversation_id).await?;
        Ok(session.enqueue(text, attachments, callbacks))
    }

    /// Queue a message and wait until it completes or is interrupted.
    /// Remote service failures surface here.
    pub async fn send(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        callbacks: MessageCallbacks,
    ) -> Result<SendOutcome, AgentError> {
        self.enqueue(conversation_id, text, attachments, callbacks)
            .await?
            .wait()
            .await
    }

    /// No-op when the conversation has no live session.
    pub async fn interrupt(&self, conversation_id: &str) {
        if let Some(session) = self.session(conversation_id) {
            session.interrupt().await;
        }
    }

    pub fn resume_processing(&self, conversation_id: &str) -> bool {
        self.session(conversation_id)
            .is_some_and(|session| session.resume_processing())
    }

    /// Interrupt the conversation's session and drop it from the pool.
    pub async fn delete(&self, conversation_id: &str) -> bool {
        let Some(session) = self.session(conversation_id) else {
            return false;
        };
        session.interrupt().await;
        self.sessions().remove(conversation_id);
        info!(conversation_id, "session deleted");
        true
    }

    pub async fn set_permission_mode(
        &self,
        conversation_id: &str,
        mode: PermissionMode,
    ) -> Result<(), AgentError> {
        let session = self.get_or_create(conversation_id).await?;
        session.set_permission_mode(mode);
        Ok(())
    }

    pub fn respond_to_permission(
        &self,
        conversation_id: &str,
        request_id: &str,
        approved: bool,
        updated_input: Option<Value>,
    ) -> bool {
        match self.session(conversation_id) {
            Some(session) => session.respond_to_permission(request_id, approved, updated_input),
            None => {
                warn!(conversation_id, request_id, "permission response for unknown session");
                false
            }
        }
    }

    pub fn respond_to_plan_approval(
        &self,
        conversation_id: &str,
        request_id: &str,
        approved: bool,
    ) -> bool {
        match self.session(conversation_id) {
            Some(session) => session.respond_to_plan_approval(request_id, approved),
            None => {
                warn!(conversation_id, request_id, "plan approval response for unknown session");
                false
            }
        }
    }

    /// Make `config` the default for new sessions and stage it on every live
    /// session for its next exchange.
    pub fn broadcast_config_reload(&self, config: SessionConfig) -> Result<(), AgentError> {
        config.validate()?;
        *self.config() = config.clone();
        let sessions: Vec<_> = self.sessions().values().cloned().collect();
        for session in &sessions {
            session.reload_config(config.clone());
        }
        info!(sessions = sessions.len(), "configuration reload staged");
        Ok(())
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Interrupt and drop every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions().drain().map(|(_, session)| session).collect();
        for session in sessions {
            session.interrupt().await;
        }
    }

    fn config(&self) -> std::sync::MutexGuard<'_, SessionConfig> {
        self.config.lock().expect("pool config mutex poisoned")
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AgentSession>>> {
        self.sessions.lock().expect("session pool mutex poisoned")
    }
}
