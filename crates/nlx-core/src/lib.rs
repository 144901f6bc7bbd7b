//! nlx-core — shared configuration, subjects, and identity helpers for the
//! Neuralux conversation engine.
//!
//! Every other crate in the workspace depends on this one; it must stay a
//! leaf (no nlx-* dependencies).

pub mod config;
pub mod error;
pub mod session;
pub mod subjects;

pub use config::NlxConfig;
pub use error::{NlxError, Result};
pub use session::{default_session_id, now_ms};
