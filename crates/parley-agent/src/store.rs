use parley_sdk::PermissionMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted attributes a session is constructed from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub working_directory: PathBuf,
    #[serde(default)]
    pub external_session_id: Option<String>,
    /// Set on forks that have not run their first exchange yet.
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
}

impl ConversationRecord {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            external_session_id: None,
            parent_session_id: None,
            permission_mode: PermissionMode::default(),
        }
    }

    pub fn with_external_session_id(mut self, id: impl Into<String>) -> Self {
        self.external_session_id = Some(id.into());
        self
    }

    pub fn with_parent_session_id(mut self, id: impl Into<String>) -> Self {
        self.parent_session_id = Some(id.into());
        self
    }

    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }
}

/// Read side of conversation persistence owned by the host application.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> StoreResult<Option<ConversationRecord>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryConversationStore {
    records: Arc<Mutex<BTreeMap<String, ConversationRecord>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation_id: impl Into<String>, record: ConversationRecord) {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        records.insert(conversation_id.into(), record);
    }

    pub fn remove(&self, conversation_id: &str) -> Option<ConversationRecord> {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        records.remove(conversation_id)
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> StoreResult<Option<ConversationRecord>> {
        if conversation_id.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "conversation id must not be empty".to_string(),
            ));
        }
        let records = self.records.lock().expect("memory store mutex poisoned");
        Ok(records.get(conversation_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn memory_store_round_trips_records() {
        let store = MemoryConversationStore::new();
        store.insert(
            "c1",
            ConversationRecord::new("/work")
                .with_parent_session_id("parent")
                .with_permission_mode(PermissionMode::Plan),
        );

        let record = store
            .load("c1")
            .await
            .expect("load should succeed")
            .expect("record should exist");
        assert_eq!(record.parent_session_id.as_deref(), Some("parent"));
        assert_eq!(record.permission_mode, PermissionMode::Plan);

        assert!(store.load("missing").await.expect("load").is_none());
        assert!(matches!(
            store.load(" ").await,
            Err(StoreError::InvalidInput(_))
        ));

        store.remove("c1");
        assert!(store.load("c1").await.expect("load").is_none());
    }
}
