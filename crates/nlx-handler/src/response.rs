use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use nlx_context::ActionResult;
use nlx_orchestrator::Action;

/// Outcome category of one `process_message` / `approve_and_execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Success,
    NeedsApproval,
    PartialSuccess,
    Error,
    Cancelled,
}

/// One executed action, flattened for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedAction {
    pub action_type: String,
    pub description: String,
    pub success: bool,
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutedAction {
    pub fn from_result(action: &Action, result: &ActionResult) -> Self {
        Self {
            action_type: action.kind.as_str().to_string(),
            description: action.description.clone(),
            success: result.success,
            details: result.details.clone(),
            error: result.error.clone(),
        }
    }
}

/// Response returned to the calling shell.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub message: String,
    pub actions: Vec<ExecutedAction>,
    /// Retained plan handle when `kind == NeedsApproval`; pass back to
    /// `approve_and_execute`.
    #[serde(skip)]
    pub pending_actions: Option<Vec<Action>>,
    pub context_updates: BTreeMap<String, Value>,
}

impl HandlerResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Success,
            message: message.into(),
            actions: Vec::new(),
            pending_actions: None,
            context_updates: BTreeMap::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            message: message.into(),
            actions: Vec::new(),
            pending_actions: None,
            context_updates: BTreeMap::new(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Cancelled,
            message: message.into(),
            actions: Vec::new(),
            pending_actions: None,
            context_updates: BTreeMap::new(),
        }
    }
}
