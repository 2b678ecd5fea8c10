//! Pending human approvals for tool calls and plans.
//!
//! Every approval is resolved exactly once. The responder half of its
//! one-shot channel is removed from the pending map under the map's lock,
//! so an explicit response and an interrupt rejection can never both reach
//! the waiting hook.

use parley_sdk::AbortSignal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalKind {
    Permission,
    Plan,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub updated_input: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ApprovalRejected {
    #[error("approval rejected: session interrupted")]
    Interrupted,
    #[error("approval rejected: exchange cancelled")]
    Aborted,
    #[error("approval rejected: superseded by a newer request with the same id")]
    Superseded,
    #[error("approval rejected: session dropped")]
    Dropped,
}

pub type ApprovalOutcome = Result<ApprovalResponse, ApprovalRejected>;

struct PendingApproval {
    kind: ApprovalKind,
    responder: oneshot::Sender<ApprovalOutcome>,
    metadata: Value,
}

#[derive(Default)]
pub struct PermissionGate {
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an approval and return the receiving half its hook awaits.
    pub fn register(
        &self,
        id: impl Into<String>,
        kind: ApprovalKind,
        metadata: Value,
    ) -> oneshot::Receiver<ApprovalOutcome> {
        let id = id.into();
        let (responder, receiver) = oneshot::channel();
        let previous = {
            let mut pending = self.pending_map();
            pending.insert(
                id.clone(),
                PendingApproval {
                    kind,
                    responder,
                    metadata,
                },
            )
        };
        if let Some(previous) = previous {
            warn!(request_id = %id, "approval id reused; rejecting the older request");
            let _ = previous.responder.send(Err(ApprovalRejected::Superseded));
        }
        debug!(request_id = %id, kind = ?kind, "approval registered");
        receiver
    }

    /// Wait for a response. Returns `None` once `signal` has fired: the entry
    /// is removed and rejected, and any outcome that raced the abort is
    /// dropped.
    pub async fn wait(
        &self,
        id: &str,
        receiver: oneshot::Receiver<ApprovalOutcome>,
        signal: &AbortSignal,
    ) -> Option<ApprovalOutcome> {
        tokio::select! {
            biased;
            outcome = receiver => {
                if signal.is_aborted() {
                    return None;
                }
                Some(outcome.unwrap_or(Err(ApprovalRejected::Dropped)))
            }
            _ = signal.aborted() => {
                self.reject(id, ApprovalRejected::Aborted);
                None
            }
        }
    }

    pub fn respond_to_permission(
        &self,
        id: &str,
        approved: bool,
        updated_input: Option<Value>,
    ) -> bool {
        self.resolve(
            id,
            ApprovalKind::Permission,
            ApprovalResponse {
                approved,
                updated_input,
            },
        )
    }

    pub fn respond_to_plan_approval(&self, id: &str, approved: bool) -> bool {
        self.resolve(
            id,
            ApprovalKind::Plan,
            ApprovalResponse {
                approved,
                updated_input: None,
            },
        )
    }

    fn resolve(&self, id: &str, kind: ApprovalKind, response: ApprovalResponse) -> bool {
        let entry = {
            let mut pending = self.pending_map();
            match pending.get(id) {
                Some(entry) if entry.kind == kind => pending.remove(id),
                Some(entry) => {
                    warn!(
                        request_id = %id,
                        expected = ?kind,
                        actual = ?entry.kind,
                        "approval response kind mismatch; ignoring"
                    );
                    return false;
                }
                None => None,
            }
        };
        let Some(entry) = entry else {
            warn!(request_id = %id, "no pending approval for response; ignoring");
            return false;
        };
        debug!(
            request_id = %id,
            approved = response.approved,
            "approval resolved"
        );
        if entry.responder.send(Ok(response)).is_err() {
            debug!(request_id = %id, "approval waiter already gone");
        }
        true
    }

    pub fn reject(&self, id: &str, reason: ApprovalRejected) -> bool {
        let entry = self.pending_map().remove(id);
        match entry {
            Some(entry) => {
                let _ = entry.responder.send(Err(reason));
                true
            }
            None => false,
        }
    }

    /// Reject every pending approval. Returns how many were rejected.
    pub fn reject_all(&self, reason: ApprovalRejected) -> usize {
        let drained: Vec<(String, PendingApproval)> = self.pending_map().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, reason = %reason, "approval rejected");
            let _ = entry.responder.send(Err(reason));
        }
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending_map().contains_key(id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending_map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pending_count(&self) -> usize {
        self.pending_map().len()
    }

    pub fn metadata(&self, id: &str) -> Option<Value> {
        self.pending_map().get(id).map(|entry| entry.metadata.clone())
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingApproval>> {
        self.pending.lock().expect("permission gate mutex poisoned")
    }
}

impl Drop for PermissionGate {
    fn drop(&mut self) {
        if let Ok(pending) = self.pending.get_mut() {
            for (_, entry) in pending.drain() {
                let _ = entry.responder.send(Err(ApprovalRejected::Dropped));
            }
        }
    }
}
