use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nlx_context::{ActionKind, ActionResult};

/// Lifecycle of a planned action within one plan/execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// A single unit of work produced by the planner and consumed by the
/// orchestrator. Lives only for the duration of one cycle — never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action_type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default = "default_status")]
    pub status: ActionStatus,
    #[serde(default = "default_needs_approval")]
    pub needs_approval: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

fn default_status() -> ActionStatus {
    ActionStatus::Pending
}

fn default_needs_approval() -> bool {
    true
}

impl Action {
    pub fn new(kind: ActionKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            status: ActionStatus::Pending,
            needs_approval: true,
            description: String::new(),
            result: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_approval(mut self, needs_approval: bool) -> Self {
        self.needs_approval = needs_approval;
        self
    }

    /// String parameter, `None` when absent, non-string, or empty.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn param_u32(&self, key: &str, default: u32) -> u32 {
        self.params
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(default)
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn set_param(&mut self, key: &str, value: impl Into<Value>) {
        self.params.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_planner_json_shape() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "command_execute",
            "params": {"command": "touch todo.txt"},
            "description": "Execute: touch todo.txt",
            "needs_approval": true
        }))
        .unwrap();
        assert_eq!(action.kind, ActionKind::CommandExecute);
        assert_eq!(action.param_str("command"), Some("touch todo.txt"));
        assert_eq!(action.status, ActionStatus::Pending);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let action: Action =
            serde_json::from_value(json!({"action_type": "llm_generate"})).unwrap();
        assert!(action.needs_approval);
        assert!(action.params.is_empty());
        assert!(action.result.is_none());
    }

    #[test]
    fn typed_param_accessors() {
        let mut action = Action::new(ActionKind::ImageGenerate, Map::new());
        action.set_param("width", 512);
        action.set_param("guidance", 1.5);
        assert_eq!(action.param_u32("width", 1024), 512);
        assert_eq!(action.param_u32("height", 1024), 1024);
        assert_eq!(action.param_f64("guidance", 0.0), 1.5);
        assert!(!action.param_bool("use_history", false));
    }
}
