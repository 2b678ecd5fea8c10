//! Client-side contract for the remote streaming agent service.
//!
//! The service is treated as an opaque bidirectional stream: it accepts a
//! sequence of outbound turns, emits a sequence of typed events, resumes or
//! forks by opaque session id, and calls a pre-tool-use hook before it runs
//! any tool.

pub mod abort;
pub mod errors;
pub mod events;
pub mod hook;
pub mod service;
pub mod testing;
pub mod types;

pub use abort::*;
pub use errors::*;
pub use events::*;
pub use hook::*;
pub use service::*;
pub use types::*;
