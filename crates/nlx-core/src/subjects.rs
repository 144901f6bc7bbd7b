//! Bus subject names consumed and produced by the conversation engine.
//!
//! Subjects are plain dotted strings; the two parametric families are built
//! with the helper functions so callers never format them by hand.

/// Request/reply: text generation. `{messages, temperature, max_tokens}` →
/// `{content}` or `{error}`.
pub const LLM_REQUEST: &str = "ai.llm.request";

/// Request/reply: OCR. `{image_path | image_bytes_b64, region?, language?}` →
/// `{text, confidence?, words?}` or `{error}`.
pub const OCR_REQUEST: &str = "ai.vision.ocr.request";

/// Request/reply: image generation. Returns `{image_path, …}` or `{error}`.
pub const IMAGEGEN_REQUEST: &str = "ai.vision.imagegen.request";

/// Publish-only: music generation. The result arrives asynchronously on the
/// session's conversation subject as a `music_result` message.
pub const MUSIC_GENERATE: &str = "agent.music.generate";

/// Request/reply: indexed document search. Returns `{results, count}`.
pub const FILE_SEARCH: &str = "system.file.search";

/// Publish-only: command observability events for the temporal service.
pub const COMMAND_EVENT: &str = "temporal.command.new";

/// Streaming subject for a session's asynchronous results
/// (`conversation.<session_id>`).
pub fn conversation(session_id: &str) -> String {
    format!("conversation.{session_id}")
}

/// Request/reply subject for a named system action
/// (`system.action.<name>`).
pub fn system_action(name: &str) -> String {
    format!("system.action.{name}")
}
