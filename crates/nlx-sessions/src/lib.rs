//! nlx-sessions — durable session persistence.
//!
//! A SQLite-backed key-value store with TTL for live sessions, bounded
//! per-user archive lists written on reset, and a best-effort settings JSON
//! blob. Load never fails toward the caller: backend errors and corrupt
//! payloads degrade to a fresh empty session with a warning.

pub mod db;
pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use store::SessionStore;
pub use types::ArchivedConversation;
