use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{keys, ActionKind, ActionResult, Role, Turn};

/// Chat message in the wire shape the LLM service expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Rich per-session conversation state.
///
/// Invariants:
/// - `turns` is append-only between resets;
/// - `updated_at` is monotone non-decreasing;
/// - `working_directory` is absolute (callers canonicalize on mutation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub working_directory: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationContext {
    /// Fresh context: no turns, working directory at the user's home.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = nlx_core::now_ms();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            turns: Vec::new(),
            variables: BTreeMap::new(),
            working_directory: dirs::home_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        // max() keeps updated_at monotone even if the clock steps backwards.
        self.updated_at = nlx_core::now_ms().max(self.updated_at);
    }

    /// Append a turn. Turns are never mutated afterwards.
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>, result: Option<ActionResult>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
            timestamp_ms: nlx_core::now_ms(),
            action_result: result,
        });
        self.touch();
    }

    pub fn set_variable(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        debug!(key, "context variable set");
        self.variables.insert(key.to_string(), value);
        self.touch();
    }

    pub fn get_variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// String variable, `None` when absent, non-string, or empty.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.variables
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// List variable; absent or non-array reads as empty.
    pub fn get_list(&self, key: &str) -> Vec<Value> {
        self.variables
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Append to a list variable, creating it when missing.
    pub fn push_list(&mut self, key: &str, value: impl Into<Value>) {
        let entry = self
            .variables
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.push(value.into());
        } else {
            *entry = Value::Array(vec![value.into()]);
        }
        self.touch();
    }

    /// Adopt a new working directory, mirrored into the variables map so the
    /// planner prompt and persisted payload stay in sync.
    pub fn set_working_directory(&mut self, dir: impl Into<String>) {
        let dir = dir.into();
        self.variables
            .insert(keys::WORKING_DIRECTORY.to_string(), Value::String(dir.clone()));
        self.working_directory = dir;
        self.touch();
    }

    /// Most recent action result, optionally filtered by kind.
    pub fn get_last_action_result(&self, kind: Option<ActionKind>) -> Option<&ActionResult> {
        self.turns.iter().rev().find_map(|turn| {
            turn.action_result
                .as_ref()
                .filter(|r| kind.map_or(true, |k| r.kind == k))
        })
    }

    /// Chat history in `{role, content}` form for the LLM service.
    pub fn get_chat_history(&self, limit: Option<usize>) -> Vec<ChatMessage> {
        let start = limit
            .map(|n| self.turns.len().saturating_sub(n))
            .unwrap_or(0);
        self.turns[start..]
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role.to_string(),
                content: turn.content.clone(),
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turns_append_and_history_limits() {
        let mut ctx = ConversationContext::new("alice@box", "alice");
        ctx.add_turn(Role::User, "hello", None);
        ctx.add_turn(Role::Assistant, "hi there", None);
        ctx.add_turn(Role::User, "generate an image", None);

        assert_eq!(ctx.turns.len(), 3);
        let history = ctx.get_chat_history(Some(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "assistant");
        assert_eq!(history[1].content, "generate an image");
    }

    #[test]
    fn updated_at_is_monotone() {
        let mut ctx = ConversationContext::new("a@b", "a");
        let mut last = ctx.updated_at;
        for i in 0..5 {
            ctx.set_variable("k", json!(i));
            assert!(ctx.updated_at >= last);
            last = ctx.updated_at;
        }
    }

    #[test]
    fn last_action_result_filters_by_kind() {
        let mut ctx = ConversationContext::new("a@b", "a");
        let mut details = serde_json::Map::new();
        details.insert("image_path".into(), json!("/tmp/sunset.png"));
        ctx.add_turn(
            Role::Assistant,
            "done",
            Some(ActionResult::ok(ActionKind::ImageGenerate, details)),
        );
        ctx.add_turn(
            Role::Assistant,
            "done",
            Some(ActionResult::ok(ActionKind::CommandExecute, Default::default())),
        );

        let latest = ctx.get_last_action_result(None).unwrap();
        assert_eq!(latest.kind, ActionKind::CommandExecute);
        let image = ctx
            .get_last_action_result(Some(ActionKind::ImageGenerate))
            .unwrap();
        assert_eq!(image.detail_str("image_path"), Some("/tmp/sunset.png"));
        assert!(ctx.get_last_action_result(Some(ActionKind::OcrCapture)).is_none());
    }

    #[test]
    fn json_roundtrip_preserves_all_fields() {
        let mut ctx = ConversationContext::new("alice@box:work", "alice");
        ctx.add_turn(Role::User, "create a file named todo.txt", None);
        ctx.set_variable(keys::LAST_CREATED_FILE, json!("/home/alice/todo.txt"));
        ctx.push_list(keys::CREATED_FILES, json!("/home/alice/todo.txt"));
        ctx.set_working_directory("/home/alice/projects");

        let raw = ctx.to_json().unwrap();
        let back = ConversationContext::from_json(&raw).unwrap();
        assert_eq!(back.session_id, ctx.session_id);
        assert_eq!(back.turns.len(), 1);
        assert_eq!(back.working_directory, "/home/alice/projects");
        assert_eq!(
            back.get_str(keys::LAST_CREATED_FILE),
            Some("/home/alice/todo.txt")
        );
        assert_eq!(back.get_list(keys::CREATED_FILES).len(), 1);
        assert_eq!(back.created_at, ctx.created_at);
    }

    #[test]
    fn push_list_replaces_non_array_value() {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(keys::CREATED_DIRS, json!("oops"));
        ctx.push_list(keys::CREATED_DIRS, json!("/tmp/d"));
        assert_eq!(ctx.get_list(keys::CREATED_DIRS), vec![json!("/tmp/d")]);
    }
}
