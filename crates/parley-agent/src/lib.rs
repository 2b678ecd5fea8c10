//! Multi-conversation orchestration for a remote streaming agent service.
//!
//! Each conversation is an [`AgentSession`] that queues user turns, runs one
//! streaming exchange per drained batch, reconciles partial text into full
//! text, and pauses tool calls on human approval. [`SessionPool`] owns one
//! session per conversation and re-emits their lifecycle events.

pub mod attachments;
pub mod callbacks;
pub mod config;
pub mod errors;
pub mod events;
pub mod interrupt;
pub mod permissions;
pub mod pool;
pub mod reconcile;
pub mod session;
pub mod store;

pub use attachments::*;
pub use callbacks::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use interrupt::*;
pub use permissions::*;
pub use pool::*;
pub use reconcile::*;
pub use session::*;
pub use store::*;
