//! nlx-planner — turns an utterance plus context into an ordered action list.
//!
//! Planning runs a fixed priority ladder; the first rung that fires wins:
//!
//! 1. Quick reference patterns ("open link 2" after a web search) — kept
//!    deterministic and ahead of the LLM so numbered references never get
//!    reinterpreted as searches.
//! 2. Informational/conversational fast path — a single `llm_generate`.
//! 3. Music fast path — explicit or implicit music requests.
//! 4. LLM-planned path — ask the LLM service for a JSON plan, then sanitize.
//!
//! Sanitization runs on every LLM plan; when it empties the plan the
//! deterministic rule planner takes over. Parameter enrichment and the
//! `xdg-open` fixup always run last.

pub mod enrich;
pub mod keywords;
pub mod llm;
pub mod planner;
pub mod quick;
pub mod rules;
pub mod sanitize;

pub use planner::ActionPlanner;
