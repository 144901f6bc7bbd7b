use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The ten action kinds the engine can plan and execute. Closed set — the
/// orchestrator's dispatch is a total match and serde refuses anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    LlmGenerate,
    ImageGenerate,
    ImageSave,
    MusicGenerate,
    MusicSave,
    OcrCapture,
    DocumentQuery,
    WebSearch,
    CommandExecute,
    SystemCommand,
}

impl ActionKind {
    /// Wire name (snake_case), as used in planner JSON and result payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::LlmGenerate => "llm_generate",
            ActionKind::ImageGenerate => "image_generate",
            ActionKind::ImageSave => "image_save",
            ActionKind::MusicGenerate => "music_generate",
            ActionKind::MusicSave => "music_save",
            ActionKind::OcrCapture => "ocr_capture",
            ActionKind::DocumentQuery => "document_query",
            ActionKind::WebSearch => "web_search",
            ActionKind::CommandExecute => "command_execute",
            ActionKind::SystemCommand => "system_command",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm_generate" => Ok(ActionKind::LlmGenerate),
            "image_generate" => Ok(ActionKind::ImageGenerate),
            "image_save" => Ok(ActionKind::ImageSave),
            "music_generate" => Ok(ActionKind::MusicGenerate),
            "music_save" => Ok(ActionKind::MusicSave),
            "ocr_capture" => Ok(ActionKind::OcrCapture),
            "document_query" => Ok(ActionKind::DocumentQuery),
            "web_search" => Ok(ActionKind::WebSearch),
            "command_execute" => Ok(ActionKind::CommandExecute),
            "system_command" => Ok(ActionKind::SystemCommand),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Classification of an action failure. Carried inside [`ActionResult`] —
/// failures are data, never panics or propagated errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingParam,
    InvalidParam,
    SourceNotFound,
    IoError,
    TransportTimeout,
    RemoteError,
    ExecutionFailure,
    PlanParseError,
    PersistenceError,
}

/// Result of one executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub kind: ActionKind,
    /// Epoch milliseconds at completion.
    pub timestamp_ms: i64,
    pub success: bool,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ActionResult {
    pub fn ok(kind: ActionKind, details: Map<String, Value>) -> Self {
        Self {
            kind,
            timestamp_ms: nlx_core::now_ms(),
            success: true,
            details,
            error: None,
            error_kind: None,
        }
    }

    pub fn err(kind: ActionKind, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp_ms: nlx_core::now_ms(),
            success: false,
            details: Map::new(),
            error: Some(message.into()),
            error_kind: Some(error_kind),
        }
    }

    /// Failure that still carries payload details (e.g. shell output).
    pub fn err_with_details(
        kind: ActionKind,
        error_kind: ErrorKind,
        message: impl Into<String>,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            kind,
            timestamp_ms: nlx_core::now_ms(),
            success: false,
            details,
            error: Some(message.into()),
            error_kind: Some(error_kind),
        }
    }

    /// String detail by key, when present.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }
}

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One utterance in a conversation. Never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_result: Option<ActionResult>,
}

/// Context variable keys written by the orchestrator on success.
///
/// Keys are stable strings; the reference resolver, planner enrichment, and
/// placeholder substitution all address variables through these names.
pub mod keys {
    pub const LAST_GENERATED_TEXT: &str = "last_generated_text";
    pub const LAST_GENERATED_IMAGE: &str = "last_generated_image";
    pub const LAST_GENERATED_MUSIC: &str = "last_generated_music";
    pub const LAST_SAVED_IMAGE: &str = "last_saved_image";
    pub const LAST_SAVED_MUSIC: &str = "last_saved_music";
    pub const LAST_CREATED_FILE: &str = "last_created_file";
    pub const CREATED_FILES: &str = "created_files";
    pub const LAST_CREATED_DIR: &str = "last_created_dir";
    pub const CREATED_DIRS: &str = "created_dirs";
    pub const LAST_OCR_TEXT: &str = "last_ocr_text";
    pub const LAST_QUERY_RESULTS: &str = "last_query_results";
    pub const LAST_QUERY: &str = "last_query";
    pub const LAST_SEARCH_RESULTS: &str = "last_search_results";
    pub const LAST_SEARCH_QUERY: &str = "last_search_query";
    pub const LAST_COMMAND: &str = "last_command";
    pub const LAST_COMMAND_EXIT_CODE: &str = "last_command_exit_code";
    pub const LAST_COMMAND_STDOUT: &str = "last_command_stdout";
    pub const LAST_COMMAND_STDERR: &str = "last_command_stderr";
    pub const WORKING_DIRECTORY: &str = "working_directory";
}
