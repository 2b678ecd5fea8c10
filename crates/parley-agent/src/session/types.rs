use crate::{AgentError, Attachment, MessageCallbacks};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Processing,
    Interrupted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Processing => "PROCESSING",
            Self::Interrupted => "INTERRUPTED",
        }
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        if self == next {
            return true;
        }
        match self {
            SessionState::Idle | SessionState::Interrupted => {
                matches!(next, SessionState::Processing)
            }
            SessionState::Processing => {
                matches!(next, SessionState::Idle | SessionState::Interrupted)
            }
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sent message ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    /// The remote service delivered this message's result.
    Completed,
    /// The session was interrupted before the result arrived.
    ///
    /// A message that was still queued stays queued: `resume_processing`, or
    /// a later enqueue, sends it after all. Its callbacks keep firing then,
    /// but this ticket has already resolved and reports nothing further.
    Interrupted,
}

pub(crate) type TicketSender = oneshot::Sender<Result<SendOutcome, AgentError>>;

/// Resolves once the queued message completes, is interrupted, or fails.
///
/// The ticket settles exactly once. See [`SendOutcome::Interrupted`] for
/// messages that are sent after their ticket reported an interrupt.
#[derive(Debug)]
pub struct MessageTicket {
    receiver: oneshot::Receiver<Result<SendOutcome, AgentError>>,
}

impl MessageTicket {
    pub(crate) fn channel() -> (TicketSender, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    pub async fn wait(self) -> Result<SendOutcome, AgentError> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(AgentError::session_closed()))
    }
}

pub(crate) struct QueuedMessage {
    /// Enqueue order within the session.
    pub seq: u64,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub callbacks: MessageCallbacks,
    pub ticket: Option<TicketSender>,
}

impl QueuedMessage {
    pub fn settle(&mut self, outcome: Result<SendOutcome, AgentError>) {
        if let Some(ticket) = self.ticket.take() {
            let _ = ticket.send(outcome);
        }
    }

    pub fn interrupt(&mut self) {
        if let Some(notice) = self.take_interrupt() {
            notice.deliver();
        }
    }

    /// Settle as interrupted later, outside any session lock.
    pub fn take_interrupt(&mut self) -> Option<InterruptNotice> {
        let ticket = self.ticket.take()?;
        Some(InterruptNotice {
            callbacks: self.callbacks.clone(),
            ticket,
        })
    }
}

pub(crate) struct InterruptNotice {
    callbacks: MessageCallbacks,
    ticket: TicketSender,
}

impl InterruptNotice {
    pub fn deliver(self) {
        self.callbacks.notify_interrupted();
        let _ = self.ticket.send(Ok(SendOutcome::Interrupted));
    }
}
