//! nlx-bus — the message transport boundary of the conversation engine.
//!
//! The engine only ever talks to [`MessageBus`]; everything above this crate
//! is transport-agnostic. Two implementations are provided:
//!
//! - [`LocalBus`]: in-process pub/sub + request/reply. Used by the test
//!   suites and by single-binary deployments that host their services in the
//!   same process.
//! - [`RemoteBus`]: TCP client speaking newline-delimited JSON frames with
//!   bounded reconnect backoff.
//!
//! Replier-side errors are carried as `{"error": "…"}` payloads, never as
//! transport failures — a `request` that reaches a replier always resolves
//! with the replier's JSON.

pub mod bus;
pub mod error;
pub mod frames;
pub mod local;
pub mod remote;

pub use bus::{MessageBus, MessageCallback, ReplyFn};
pub use error::{BusError, Result};
pub use local::LocalBus;
pub use remote::RemoteBus;
