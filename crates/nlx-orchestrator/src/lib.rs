//! nlx-orchestrator — executes one typed action at a time against the bus.
//!
//! The [`Orchestrator`] owns the dispatch table: one handler per
//! [`ActionKind`](nlx_context::ActionKind), each translating the action into
//! bus calls, local file operations, or a shell subprocess, then applying the
//! context-mutation rules. Failures are data — every path returns an
//! `ActionResult`, never an `Err`.

pub mod action;
pub mod fileops;
pub mod orchestrator;
pub mod paths;
pub mod shell;
pub mod websearch;

pub use action::{Action, ActionStatus};
pub use orchestrator::{is_deferred, Orchestrator};
pub use paths::PathExpander;
