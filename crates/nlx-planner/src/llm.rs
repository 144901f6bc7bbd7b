//! LLM-backed planning: prompt assembly and tolerant JSON plan parsing.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{error, warn};

use nlx_context::{ActionKind, ConversationContext, ResolvedValues};
use nlx_orchestrator::Action;

/// Build the planning system prompt: the ten action kinds, their parameter
/// schemas, approval rules, path conventions, current context, and worked
/// examples.
pub fn build_planning_prompt(context: &ConversationContext, resolved: &ResolvedValues) -> String {
    let mut variables_summary = String::new();
    for (key, value) in &context.variables {
        match value {
            Value::String(s) => {
                let shown: String = s.chars().take(100).collect();
                variables_summary.push_str(&format!("- {key}: {shown}\n"));
            }
            other => {
                let type_name = match other {
                    Value::Array(_) => "list",
                    Value::Object(_) => "object",
                    Value::Number(_) => "number",
                    Value::Bool(_) => "bool",
                    Value::Null => "null",
                    Value::String(_) => unreachable!(),
                };
                variables_summary.push_str(&format!("- {key}: {type_name}\n"));
            }
        }
    }
    if variables_summary.is_empty() {
        variables_summary.push_str("- None\n");
    }

    let mut resolved_summary = String::new();
    for (key, value) in resolved {
        resolved_summary.push_str(&format!("- {key}: {value}\n"));
    }
    if resolved_summary.is_empty() {
        resolved_summary.push_str("- None\n");
    }

    let working_directory = if context.working_directory.is_empty() {
        "~"
    } else {
        &context.working_directory
    };

    format!(
        r#"You are an AI action planner for a command-line assistant. Your job is to break down user requests into executable actions.

This is a HYBRID system:
- AI capabilities (llm, image generation, music generation, OCR, document search, web search) have dedicated actions
- File/system operations use shell commands (command_execute)

Available action types:

AI-SPECIFIC ACTIONS (not shell commands):
1. llm_generate - Generate text with AI
   params: prompt (str), system_prompt (str, optional), temperature (float, default 0.7), max_tokens (int, default 500), use_history (bool, default false)
   needs_approval: false

2. image_generate - Generate an image with AI
   params: prompt (str), width (int, default 1024), height (int, default 1024), steps (int, default 4)
   needs_approval: false

3. music_generate - Generate music with AI
   params: prompt (str)
   needs_approval: true

4. music_save - Save AI-generated music to a specific location
   params: src_path (str), dst_path (str)
   needs_approval: true

5. image_save - Save AI-generated image to a specific location
   params: src_path (str), dst_path (str)
   needs_approval: true

6. ocr_capture - Extract text from image/screen with OCR
   params: image_path (str, optional), region (str, optional), language (str, optional)
   needs_approval: false

7. document_query - Search indexed documents (semantic search)
   params: query (str), limit (int, default 10)
   needs_approval: false

8. web_search - Search the web
   params: query (str), limit (int, default 5)
   needs_approval: false

COMMAND EXECUTION (for file/system operations):
9. command_execute - Execute ANY shell command
   params: command (str), stdin (str, optional)
   needs_approval: true (ALWAYS)

10. system_command - Execute a system action via the system service
   params: action (str), payload (object)
   needs_approval: true (ALWAYS)

   Common commands:
   - Create file: touch filename OR echo "content" > filename
   - Write to file: echo "content" > filename (overwrite) OR echo "content" >> filename (append)
   - Read text file: cat filename (for .txt, .log, etc.)
   - Open document/file: xdg-open filename (for .odt, .pdf, images, etc.) OR xdg-open 'url' (for URLs)
   - Open application: appname & (e.g. firefox &) - DO NOT use xdg-open for applications!
   - Move file: mv source destination
   - Create directory: mkdir -p dirname
   - List files: ls -la [path]

Current context:
Working directory: {working_directory}

Context variables:
{variables_summary}
Resolved references:
{resolved_summary}
Path shortcuts you can use:
- Use "~/Pictures", "~/Documents", "~/Downloads", "~/Desktop" etc.
- Use "Pictures" or "pictures" instead of the full path; paths are expanded automatically

CRITICAL RULES FOR MUSIC GENERATION:
- "generate music", "generate a song", "medieval music", etc. -> use `music_generate`
- Music files are AUDIO files (.wav, .mp3), NOT text files
- NEVER use `command_execute` with echo/cat for music - music is binary audio data
- Use `music_save` (NOT `image_save`) when saving generated music
- `music_generate` produces an audio file, stored in context as `last_generated_music`
- Only chain `music_save` if the user explicitly asks to save (e.g. "and save it")

Important rules:
1. ALL command_execute actions ALWAYS require approval - the user must see the exact command
2. AI actions (llm_generate, image_generate, ocr_capture, document_query, web_search) don't need approval
3. When generating text content for a file: llm_generate first, then command_execute with cat > file
4. Use proper shell quoting for content with special characters
5. Chain actions: one action's output feeds into the next via placeholders like {{{{last_generated_image}}}}
6. For image operations use image_generate and image_save, never command_execute
7. Only perform the actions the user explicitly asks for

Examples:

User: "create a file named test.txt"
Response: {{"explanation": "Creating file", "actions": [{{"action_type": "command_execute", "params": {{"command": "touch test.txt"}}, "description": "Execute: touch test.txt", "needs_approval": true}}]}}

User: "write a summary of Marie Curie in summary.txt"
Response: {{"explanation": "Generate and write summary", "actions": [
  {{"action_type": "llm_generate", "params": {{"prompt": "Write a concise summary of Marie Curie's life"}}, "description": "Generate Marie Curie summary", "needs_approval": false}},
  {{"action_type": "command_execute", "params": {{"command": "cat > summary.txt"}}, "description": "Execute: cat > summary.txt (with generated content)", "needs_approval": true}}
]}}

User: "search my documents for Python tutorials"
Response: {{"explanation": "Searching indexed documents", "actions": [{{"action_type": "document_query", "params": {{"query": "Python tutorials", "limit": 10}}, "description": "Search: Python tutorials", "needs_approval": false}}]}}

User: "generate an image of a sunset"
Response: {{"explanation": "Generating image", "actions": [{{"action_type": "image_generate", "params": {{"prompt": "a sunset"}}, "description": "Generate sunset image", "needs_approval": false}}]}}

User: "save it to Pictures"  (after generating an image)
Response: {{"explanation": "Saving image", "actions": [{{"action_type": "image_save", "params": {{"src_path": "{{{{last_generated_image}}}}", "dst_path": "~/Pictures"}}, "description": "Save to Pictures folder", "needs_approval": true}}]}}

User: "generate a heavy metal song and save it"
Response: {{"explanation": "Generating and saving a heavy metal song", "actions": [
  {{"action_type": "music_generate", "params": {{"prompt": "a heavy metal song"}}, "description": "Generate heavy metal song", "needs_approval": false}},
  {{"action_type": "music_save", "params": {{"src_path": "{{{{last_generated_music}}}}", "dst_path": "~/Music"}}, "description": "Save to Music folder", "needs_approval": true}}
]}}

User: "open firefox"
Response: {{"explanation": "Opening application", "actions": [{{"action_type": "command_execute", "params": {{"command": "firefox &"}}, "description": "Execute: firefox &", "needs_approval": true}}]}}

User: "list my files"
Response: {{"explanation": "Listing files", "actions": [{{"action_type": "command_execute", "params": {{"command": "ls -la ~"}}, "description": "Execute: ls -la ~", "needs_approval": true}}]}}

Now plan the actions for the user's request."#
    )
}

/// Build the per-request user message sent alongside the system prompt.
pub fn build_user_message(original_input: &str) -> String {
    format!(
        r#"User request: {original_input}

Plan the required actions to fulfill this request. Respond in JSON format with:
{{
  "explanation": "Brief explanation of what you'll do",
  "actions": [
    {{
      "action_type": "music_generate|music_save|image_generate|image_save|llm_generate|ocr_capture|command_execute|system_command|document_query|web_search",
      "params": {{}},
      "description": "What this action does",
      "needs_approval": true/false
    }}
  ]
}}

CRITICAL REMINDERS:
- For music generation: use music_generate (NOT image_generate, NOT llm_generate, NOT command_execute)
- For saving music: use music_save (NOT image_save, NOT command_execute)
- Music is audio data, NOT text - never use echo/cat/write commands for music"#
    )
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex")
});

/// Extract the first top-level JSON object from an LLM response.
///
/// Markdown fences are tried first; otherwise a balanced-brace scan from the
/// first `{`.
pub fn extract_json_object(content: &str) -> Option<String> {
    if let Some(caps) = FENCED_JSON.captures(content) {
        return Some(caps[1].trim().to_string());
    }

    let trimmed = content.trim();
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(trimmed[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse an LLM planning response into actions plus explanation.
///
/// Returns `None` when no JSON object can be recovered (the caller falls
/// back to the deterministic planner). Individual malformed actions are
/// logged and skipped.
pub fn parse_plan(content: &str) -> Option<(Vec<Action>, String)> {
    let json_str = extract_json_object(content)?;
    let plan: Value = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "planner JSON did not parse");
            return None;
        }
    };

    let explanation = plan
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or("Processing your request")
        .to_string();

    let mut actions = Vec::new();
    for entry in plan
        .get("actions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match parse_action(entry) {
            Some(action) => actions.push(action),
            None => error!(data = %entry, "failed to parse planned action"),
        }
    }

    Some((actions, explanation))
}

fn parse_action(entry: &Value) -> Option<Action> {
    let kind: ActionKind = entry
        .get("action_type")
        .and_then(Value::as_str)
        .unwrap_or("llm_generate")
        .parse()
        .ok()?;

    let params = entry
        .get("params")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let description = entry
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let needs_approval = entry
        .get("needs_approval")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    // The approval gate is non-negotiable for shell and system actions,
    // whatever the model claimed.
    let needs_approval = needs_approval
        || matches!(kind, ActionKind::CommandExecute | ActionKind::SystemCommand);

    Some(
        Action::new(kind, params)
            .with_description(description)
            .with_approval(needs_approval),
    )
}
