//! nlx-handler — the conversation coordinator.
//!
//! [`ConversationHandler`] sequences one exchange end to end: append the
//! user turn, plan, gate on approval, execute actions in order with output
//! chaining, join the asynchronous music result, append the assistant turn,
//! and persist the session. One handler instance owns one session.

pub mod handler;
pub mod response;
pub mod subst;

pub use handler::ConversationHandler;
pub use response::{ExecutedAction, HandlerResponse, ResponseKind};
