//! Action dispatch — one handler per kind, each a translation to bus calls,
//! local file operations, or a shell subprocess, plus the context-mutation
//! rules applied after success.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use nlx_bus::{BusError, MessageBus};
use nlx_context::{keys, ActionKind, ActionResult, ConversationContext, ErrorKind};
use nlx_core::config::TimeoutConfig;
use nlx_core::subjects;

use crate::action::{Action, ActionStatus};
use crate::fileops::{self, FileOpError};
use crate::paths::PathExpander;
use crate::shell::{self, ShellError};
use crate::websearch::WebSearcher;

/// Context variables cap stdout/stderr at 8 KiB; the immediate response
/// keeps the full capture.
const COMMAND_OUTPUT_BOUND: usize = 8 * 1024;

/// Marker detail on a `music_save` whose source is still being generated.
const STATUS_DEFERRED: &str = "deferred";

/// Executes one action at a time against the bus, mutating the context
/// after each success.
pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    timeouts: TimeoutConfig,
    web: WebSearcher,
}

impl Orchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, timeouts: TimeoutConfig) -> Self {
        Self {
            bus,
            timeouts,
            web: WebSearcher::new(),
        }
    }

    /// Execute a single action. Failures come back as unsuccessful
    /// `ActionResult`s, never as panics or errors.
    pub async fn execute_action(
        &self,
        action: &mut Action,
        context: &mut ConversationContext,
    ) -> ActionResult {
        info!(kind = %action.kind, "executing action");
        action.status = ActionStatus::Executing;
        let started = Instant::now();

        let result = match action.kind {
            ActionKind::LlmGenerate => self.llm_generate(action, context).await,
            ActionKind::ImageGenerate => self.image_generate(action).await,
            ActionKind::ImageSave => self.save_media(action, context, "image").await,
            ActionKind::MusicGenerate => self.music_generate(action, context).await,
            ActionKind::MusicSave => self.save_media(action, context, "music").await,
            ActionKind::OcrCapture => self.ocr_capture(action).await,
            ActionKind::DocumentQuery => self.document_query(action).await,
            ActionKind::WebSearch => self.web_search(action).await,
            ActionKind::CommandExecute => self.command_execute(action, context).await,
            ActionKind::SystemCommand => self.system_command(action).await,
        };

        let deferred = is_deferred(&result);
        action.status = if deferred {
            // Stays pending so the handler can re-execute it after the
            // asynchronous music result arrives.
            ActionStatus::Pending
        } else if result.success {
            ActionStatus::Completed
        } else {
            ActionStatus::Failed
        };
        action.result = Some(result.clone());

        if result.success && !deferred {
            self.update_context(action.kind, &result, context);
        }

        info!(
            kind = %action.kind,
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action complete"
        );
        result
    }

    // -----------------------------------------------------------------------
    // Per-kind handlers
    // -----------------------------------------------------------------------

    async fn llm_generate(&self, action: &Action, context: &ConversationContext) -> ActionResult {
        let Some(prompt) = action.param_str("prompt") else {
            return missing_param(action.kind, "prompt");
        };
        let temperature = action.param_f64("temperature", 0.3);
        let max_tokens = action.param_u32("max_tokens", 256);
        let use_history = action.param_bool("use_history", false);

        let mut messages: Vec<Value> = Vec::new();
        if let Some(system_prompt) = action.param_str("system_prompt") {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        if use_history {
            for msg in context.get_chat_history(Some(10)) {
                messages.push(json!({"role": msg.role, "content": msg.content}));
            }
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let request = json!({
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        match self
            .bus
            .request(
                subjects::LLM_REQUEST,
                request,
                Duration::from_secs(self.timeouts.llm_secs),
            )
            .await
        {
            Ok(reply) => match remote_error(&reply) {
                Some(err) => ActionResult::err(action.kind, ErrorKind::RemoteError, err),
                None => {
                    let content = reply.get("content").and_then(Value::as_str).unwrap_or("");
                    ActionResult::ok(
                        action.kind,
                        obj(json!({"content": content, "prompt": prompt})),
                    )
                }
            },
            Err(e) => transport_failure(action.kind, e),
        }
    }

    async fn image_generate(&self, action: &Action) -> ActionResult {
        let Some(prompt) = action.param_str("prompt") else {
            return missing_param(action.kind, "prompt");
        };
        let width = action.param_u32("width", 1024);
        let height = action.param_u32("height", 1024);

        let request = json!({
            "prompt": prompt,
            "width": width,
            "height": height,
            "num_inference_steps": action.param_u32("steps", 4),
            "guidance_scale": action.param_f64("guidance", 0.0),
        });

        match self
            .bus
            .request(
                subjects::IMAGEGEN_REQUEST,
                request,
                Duration::from_secs(self.timeouts.image_secs),
            )
            .await
        {
            Ok(reply) => match remote_error(&reply) {
                Some(err) => ActionResult::err(action.kind, ErrorKind::RemoteError, err),
                None => {
                    let image_path = reply.get("image_path").and_then(Value::as_str).unwrap_or("");
                    ActionResult::ok(
                        action.kind,
                        obj(json!({
                            "image_path": image_path,
                            "prompt": prompt,
                            "width": width,
                            "height": height,
                        })),
                    )
                }
            },
            Err(e) => transport_failure(action.kind, e),
        }
    }

    /// Publish-only: the final file path arrives later on
    /// `conversation.<session_id>` and is joined by the handler.
    async fn music_generate(
        &self,
        action: &Action,
        context: &ConversationContext,
    ) -> ActionResult {
        let Some(prompt) = action.param_str("prompt") else {
            return missing_param(action.kind, "prompt");
        };

        let request = json!({
            "prompt": prompt,
            "user_id": context.user_id,
            "conversation_id": context.session_id,
        });

        match self.bus.publish(subjects::MUSIC_GENERATE, request).await {
            Ok(()) => ActionResult::ok(
                action.kind,
                obj(json!({"status": "pending", "prompt": prompt})),
            ),
            Err(e) => transport_failure(action.kind, e),
        }
    }

    /// Shared implementation of `image_save` / `music_save`.
    async fn save_media(
        &self,
        action: &Action,
        context: &ConversationContext,
        media: &str,
    ) -> ActionResult {
        let Some(src_path) = action.param_str("src_path") else {
            return missing_param(action.kind, "src_path");
        };

        // Music still being generated: skip without failing. The handler
        // re-executes this action once the async result lands.
        if action.kind == ActionKind::MusicSave && src_path.contains("{{last_generated_music}}") {
            return ActionResult::ok(
                action.kind,
                obj(json!({"status": STATUS_DEFERRED, "reason": "music generation pending"})),
            );
        }

        let Some(dst_path) = action.param_str("dst_path") else {
            return missing_param(action.kind, "dst_path");
        };

        let src = PathBuf::from(src_path);
        if !src.exists() {
            return ActionResult::err(
                action.kind,
                ErrorKind::SourceNotFound,
                format!("Source {media} file not found: {src_path}"),
            );
        }

        let mut dst = PathExpander::expand(dst_path, &context.working_directory);
        if dst.is_dir() || dst_path.ends_with('/') || dst.extension().is_none() {
            if let Err(e) = std::fs::create_dir_all(&dst) {
                return ActionResult::err(action.kind, ErrorKind::IoError, e.to_string());
            }
            let fallback_ext = if media == "music" { "wav" } else { "png" };
            let filename = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| {
                    format!("neuralux_{media}_{}.{fallback_ext}", nlx_core::now_ms() / 1000)
                });
            dst = dst.join(filename);
        }

        match fileops::copy_file(&src, &dst, true) {
            Ok(()) => ActionResult::ok(
                action.kind,
                obj(json!({
                    "saved_path": dst.to_string_lossy(),
                    "original_path": src.to_string_lossy(),
                })),
            ),
            Err(FileOpError::SourceNotFound(p)) => ActionResult::err(
                action.kind,
                ErrorKind::SourceNotFound,
                format!("Source {media} file not found: {}", p.display()),
            ),
            Err(e) => ActionResult::err(action.kind, ErrorKind::IoError, e.to_string()),
        }
    }

    async fn ocr_capture(&self, action: &Action) -> ActionResult {
        // A region must be "x,y,w,h"; anything else fails before the bus.
        if let Some(region) = action.param_str("region") {
            let region_re =
                Regex::new(r"^\d+\s*,\s*\d+\s*,\s*\d+\s*,\s*\d+$").expect("static regex");
            if !region_re.is_match(region) {
                return ActionResult::err(
                    action.kind,
                    ErrorKind::InvalidParam,
                    format!("Invalid region: {region} (expected x,y,width,height)"),
                );
            }
        }

        let mut request = Map::new();
        for key in ["image_path", "region", "language"] {
            if let Some(value) = action.params.get(key) {
                request.insert(key.to_string(), value.clone());
            }
        }

        match self
            .bus
            .request(
                subjects::OCR_REQUEST,
                Value::Object(request),
                Duration::from_secs(self.timeouts.ocr_secs),
            )
            .await
        {
            Ok(reply) => match remote_error(&reply) {
                Some(err) => ActionResult::err(action.kind, ErrorKind::RemoteError, err),
                None => {
                    let text = reply.get("text").and_then(Value::as_str).unwrap_or("");
                    ActionResult::ok(action.kind, obj(json!({"text": text})))
                }
            },
            Err(e) => transport_failure(action.kind, e),
        }
    }

    async fn document_query(&self, action: &Action) -> ActionResult {
        // "search" is a tolerated alias the planner LLM occasionally emits.
        let query = action
            .param_str("query")
            .or_else(|| action.param_str("search"));
        let Some(query) = query else {
            return missing_param(action.kind, "query");
        };
        let limit = action.param_u32("limit", 10);

        match self
            .bus
            .request(
                subjects::FILE_SEARCH,
                json!({"query": query, "limit": limit}),
                Duration::from_secs(self.timeouts.document_secs),
            )
            .await
        {
            Ok(reply) => match remote_error(&reply) {
                Some(err) => ActionResult::err(action.kind, ErrorKind::RemoteError, err),
                None => {
                    let results = reply
                        .get("results")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    ActionResult::ok(
                        action.kind,
                        obj(json!({
                            "query": query,
                            "count": results.len(),
                            "results": results,
                        })),
                    )
                }
            },
            Err(e) => transport_failure(action.kind, e),
        }
    }

    async fn web_search(&self, action: &Action) -> ActionResult {
        let Some(query) = action.param_str("query") else {
            return missing_param(action.kind, "query");
        };
        let limit = action.param_u32("limit", 5) as usize;

        match self
            .web
            .search(query, limit, Duration::from_secs(self.timeouts.web_secs))
            .await
        {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .iter()
                    .map(|h| serde_json::to_value(h).unwrap_or(Value::Null))
                    .collect();
                ActionResult::ok(
                    action.kind,
                    obj(json!({
                        "query": query,
                        "count": results.len(),
                        "results": results,
                    })),
                )
            }
            Err(e) => ActionResult::err(
                action.kind,
                ErrorKind::RemoteError,
                format!("Web search failed: {e}"),
            ),
        }
    }

    async fn command_execute(
        &self,
        action: &Action,
        context: &ConversationContext,
    ) -> ActionResult {
        let Some(command) = action.param_str("command") else {
            return missing_param(action.kind, "command");
        };
        let stdin = action.param_str("stdin");

        match shell::run_command(
            command,
            stdin,
            &context.working_directory,
            Duration::from_secs(self.timeouts.shell_secs),
        )
        .await
        {
            Ok(output) => {
                // Best-effort observability event; never blocks the result.
                self.publish_command_event(command, output.exit_code, context)
                    .await;

                let details = obj(json!({
                    "command": command,
                    "returncode": output.exit_code,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }));
                if output.exit_code == 0 {
                    ActionResult::ok(action.kind, details)
                } else {
                    let message = if output.stderr.is_empty() {
                        format!("Command exited with status {}", output.exit_code)
                    } else {
                        output.stderr.clone()
                    };
                    ActionResult::err_with_details(
                        action.kind,
                        ErrorKind::ExecutionFailure,
                        message,
                        details,
                    )
                }
            }
            // No exit code on timeout, so no command event either.
            Err(ShellError::Timeout { secs }) => ActionResult::err(
                action.kind,
                ErrorKind::ExecutionFailure,
                format!("Command timed out after {secs}s"),
            ),
            Err(e) => ActionResult::err(
                action.kind,
                ErrorKind::ExecutionFailure,
                format!("Command execution failed: {e}"),
            ),
        }
    }

    async fn system_command(&self, action: &Action) -> ActionResult {
        let Some(name) = action.param_str("action") else {
            return ActionResult::err(
                action.kind,
                ErrorKind::MissingParam,
                "Missing action name for system command",
            );
        };
        let payload = action
            .params
            .get("payload")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self
            .bus
            .request(
                &subjects::system_action(name),
                payload,
                Duration::from_secs(self.timeouts.system_secs),
            )
            .await
        {
            Ok(reply) => match remote_error(&reply) {
                Some(err) => ActionResult::err_with_details(
                    action.kind,
                    ErrorKind::RemoteError,
                    err,
                    value_to_details(reply),
                ),
                None => ActionResult::ok(action.kind, value_to_details(reply)),
            },
            Err(e) => transport_failure(action.kind, e),
        }
    }

    async fn publish_command_event(
        &self,
        command: &str,
        exit_code: i32,
        context: &ConversationContext,
    ) {
        let cwd = if context.working_directory.is_empty() {
            dirs::home_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            context.working_directory.clone()
        };

        let payload = json!({
            "event_type": "command",
            "command": command,
            "cwd": cwd,
            "exit_code": exit_code,
            "user": context.user_id,
        });

        if let Err(e) = self.bus.publish(subjects::COMMAND_EVENT, payload).await {
            warn!(command, error = %e, "command event publish failed");
        }
    }

    // -----------------------------------------------------------------------
    // Context mutation
    // -----------------------------------------------------------------------

    fn update_context(
        &self,
        kind: ActionKind,
        result: &ActionResult,
        context: &mut ConversationContext,
    ) {
        match kind {
            ActionKind::LlmGenerate => {
                if let Some(content) = result.detail_str("content") {
                    context.set_variable(keys::LAST_GENERATED_TEXT, content);
                }
            }
            ActionKind::ImageGenerate => {
                if let Some(path) = result.detail_str("image_path") {
                    context.set_variable(keys::LAST_GENERATED_IMAGE, path);
                }
            }
            ActionKind::MusicGenerate => {
                // Usually pending here; the handler sets the variable when
                // the async result arrives.
                if let Some(path) = result.detail_str("file_path") {
                    context.set_variable(keys::LAST_GENERATED_MUSIC, path);
                }
            }
            ActionKind::ImageSave => {
                if let Some(path) = result.detail_str("saved_path") {
                    context.set_variable(keys::LAST_SAVED_IMAGE, path);
                }
            }
            ActionKind::MusicSave => {
                if let Some(path) = result.detail_str("saved_path") {
                    context.set_variable(keys::LAST_SAVED_MUSIC, path);
                }
            }
            ActionKind::OcrCapture => {
                if let Some(text) = result.detail_str("text") {
                    if !text.is_empty() {
                        context.set_variable(keys::LAST_OCR_TEXT, text);
                    }
                }
            }
            ActionKind::DocumentQuery => {
                // Empty result sets are recorded too — "no hits" is state.
                let results = result.details.get("results").cloned().unwrap_or(json!([]));
                context.set_variable(keys::LAST_QUERY_RESULTS, results);
                if let Some(query) = result.detail_str("query") {
                    context.set_variable(keys::LAST_QUERY, query);
                }
            }
            ActionKind::WebSearch => {
                let results = result.details.get("results").cloned().unwrap_or(json!([]));
                context.set_variable(keys::LAST_SEARCH_RESULTS, results);
                if let Some(query) = result.detail_str("query") {
                    context.set_variable(keys::LAST_SEARCH_QUERY, query);
                }
            }
            ActionKind::CommandExecute => self.update_command_context(result, context),
            ActionKind::SystemCommand => {}
        }
    }

    fn update_command_context(&self, result: &ActionResult, context: &mut ConversationContext) {
        let Some(command) = result.detail_str("command").map(String::from) else {
            return;
        };
        context.set_variable(keys::LAST_COMMAND, command.as_str());
        if let Some(code) = result.details.get("returncode").and_then(Value::as_i64) {
            context.set_variable(keys::LAST_COMMAND_EXIT_CODE, code);
        }
        if let Some(stdout) = result.detail_str("stdout") {
            if !stdout.is_empty() {
                context.set_variable(
                    keys::LAST_COMMAND_STDOUT,
                    truncate_utf8(stdout, COMMAND_OUTPUT_BOUND),
                );
            }
        }
        if let Some(stderr) = result.detail_str("stderr") {
            if !stderr.is_empty() {
                context.set_variable(
                    keys::LAST_COMMAND_STDERR,
                    truncate_utf8(stderr, COMMAND_OUTPUT_BOUND),
                );
            }
        }

        let tokens = shell::tokenize(&command);
        let Some((cmd, args)) = tokens.split_first() else {
            return;
        };
        // Expand against the cwd the command actually ran in.
        let cwd = context.working_directory.clone();
        let expand = move |p: &str| {
            PathExpander::expand(p, &cwd)
                .to_string_lossy()
                .into_owned()
        };

        // cd DIR — adopt the new working directory.
        if cmd == "cd" {
            if let Some(dir) = args.first() {
                let new_dir = expand(dir);
                context.set_working_directory(new_dir);
            }
            return;
        }

        // mkdir [-p] DIR … — track the last directory and adopt it as cwd
        // so follow-up commands chain naturally.
        if cmd == "mkdir" {
            let candidates: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
            if let Some(last) = candidates.last() {
                let dir = expand(last);
                context.set_variable(keys::LAST_CREATED_DIR, dir.as_str());
                context.push_list(keys::CREATED_DIRS, dir.as_str());
                context.set_working_directory(dir);
            }
            return;
        }

        // `… > target` redirection, or `touch FILE`.
        let redir_re = Regex::new(r">\s*([^\s>]+)\s*$").expect("static regex");
        let mut target = redir_re
            .captures(&command)
            .map(|c| c[1].to_string());
        if cmd == "touch" {
            if let Some(last) = args.last() {
                target = Some(last.clone());
            }
        }
        if let Some(target) = target {
            let path = expand(&target);
            context.set_variable(keys::LAST_CREATED_FILE, path.as_str());
            context.push_list(keys::CREATED_FILES, path.as_str());
        }

        // mv/cp destination becomes the latest known file.
        if (cmd == "mv" || cmd == "cp") && args.len() >= 2 {
            if let Some(last) = args.last() {
                context.set_variable(keys::LAST_CREATED_FILE, expand(last).as_str());
            }
        }
    }
}

/// Did the orchestrator defer this action instead of executing it?
pub fn is_deferred(result: &ActionResult) -> bool {
    result.success && result.detail_str("status") == Some(STATUS_DEFERRED)
}

fn missing_param(kind: ActionKind, name: &str) -> ActionResult {
    ActionResult::err(
        kind,
        ErrorKind::MissingParam,
        format!("Missing {name} parameter"),
    )
}

fn transport_failure(kind: ActionKind, e: BusError) -> ActionResult {
    ActionResult::err(kind, ErrorKind::TransportTimeout, e.to_string())
}

/// `{error}` payloads from repliers are remote failures, not transport ones.
fn remote_error(reply: &Value) -> Option<String> {
    reply
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

fn value_to_details(value: Value) -> Map<String, Value> {
    obj(value)
}

/// Byte-bounded truncation that never splits a UTF-8 sequence.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlx_bus::bus::reply_fn;
    use nlx_bus::LocalBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    fn harness() -> (Arc<LocalBus>, Orchestrator, ConversationContext) {
        let bus = Arc::new(LocalBus::new());
        let orchestrator = Orchestrator::new(bus.clone(), TimeoutConfig::default());
        let ctx = ConversationContext::new("tester@box", "tester");
        (bus, orchestrator, ctx)
    }

    fn action(kind: ActionKind, params: Value) -> Action {
        Action::new(kind, obj(params))
    }

    #[tokio::test]
    async fn llm_generate_sets_last_generated_text() {
        let (bus, orchestrator, mut ctx) = harness();
        bus.reply_handler(
            subjects::LLM_REQUEST,
            reply_fn(|_| async { json!({"content": "Here are five ideas."}) }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::LlmGenerate, json!({"prompt": "five ideas"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        assert_eq!(result.detail_str("content"), Some("Here are five ideas."));
        assert_eq!(
            ctx.get_str(keys::LAST_GENERATED_TEXT),
            Some("Here are five ideas.")
        );
        assert_eq!(a.status, ActionStatus::Completed);
    }

    #[tokio::test]
    async fn llm_generate_without_prompt_is_missing_param() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(ActionKind::LlmGenerate, json!({}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::MissingParam));
        assert_eq!(a.status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn replier_error_payload_maps_to_remote_error() {
        let (bus, orchestrator, mut ctx) = harness();
        bus.reply_handler(
            subjects::LLM_REQUEST,
            reply_fn(|_| async { json!({"error": "model not loaded"}) }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::LlmGenerate, json!({"prompt": "hi"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert_eq!(result.error_kind, Some(ErrorKind::RemoteError));
        assert_eq!(result.error.as_deref(), Some("model not loaded"));
    }

    #[tokio::test]
    async fn missing_responder_is_a_transport_failure() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(ActionKind::OcrCapture, json!({}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TransportTimeout));
    }

    #[tokio::test]
    async fn image_generate_fills_default_dimensions() {
        let (bus, orchestrator, mut ctx) = harness();
        let seen = Arc::new(StdMutex::new(Value::Null));
        let seen_replier = seen.clone();
        bus.reply_handler(
            subjects::IMAGEGEN_REQUEST,
            reply_fn(move |req| {
                let seen = seen_replier.clone();
                async move {
                    *seen.lock().unwrap() = req;
                    json!({"image_path": "/tmp/nlx/gen.png", "prompt": "a sunset", "model": "flux"})
                }
            }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::ImageGenerate, json!({"prompt": "a sunset"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        let request = seen.lock().unwrap().clone();
        assert_eq!(request["width"], 1024);
        assert_eq!(request["height"], 1024);
        assert_eq!(request["num_inference_steps"], 4);
        assert_eq!(ctx.get_str(keys::LAST_GENERATED_IMAGE), Some("/tmp/nlx/gen.png"));
    }

    #[tokio::test]
    async fn music_generate_publishes_and_reports_pending() {
        let (bus, orchestrator, mut ctx) = harness();
        let published = Arc::new(AtomicU32::new(0));
        let counter = published.clone();
        bus.subscribe(
            subjects::MUSIC_GENERATE,
            None,
            Arc::new(move |msg| {
                assert_eq!(msg["prompt"], "a heavy metal song");
                assert_eq!(msg["conversation_id"], "tester@box");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::MusicGenerate, json!({"prompt": "a heavy metal song"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        assert_eq!(result.detail_str("status"), Some("pending"));
        assert_eq!(published.load(Ordering::SeqCst), 1);
        // The variable is only set when the async result arrives.
        assert!(ctx.get_str(keys::LAST_GENERATED_MUSIC).is_none());
    }

    #[tokio::test]
    async fn music_save_with_placeholder_is_deferred_not_failed() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(
            ActionKind::MusicSave,
            json!({"src_path": "{{last_generated_music}}", "dst_path": "~/Music"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        assert!(is_deferred(&result));
        assert_eq!(a.status, ActionStatus::Pending);
        assert!(ctx.get_str(keys::LAST_SAVED_MUSIC).is_none());
    }

    #[tokio::test]
    async fn image_save_into_directory_keeps_basename_and_bytes() {
        let (_bus, orchestrator, mut ctx) = harness();
        let dir = tempfile::tempdir().unwrap();
        ctx.set_working_directory(dir.path().to_string_lossy().into_owned());

        let src = dir.path().join("sunset.png");
        std::fs::write(&src, b"png bytes").unwrap();

        let mut a = action(
            ActionKind::ImageSave,
            json!({"src_path": src.to_string_lossy(), "dst_path": "gallery"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success, "{:?}", result.error);
        let saved = result.detail_str("saved_path").unwrap();
        assert!(saved.ends_with("gallery/sunset.png"));
        assert_eq!(std::fs::read(saved).unwrap(), b"png bytes");
        assert_eq!(ctx.get_str(keys::LAST_SAVED_IMAGE), Some(saved));
    }

    #[tokio::test]
    async fn music_save_missing_source_is_typed() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(
            ActionKind::MusicSave,
            json!({"src_path": "/tmp/definitely-missing.wav", "dst_path": "~/Music"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert_eq!(result.error_kind, Some(ErrorKind::SourceNotFound));
    }

    #[tokio::test]
    async fn touch_updates_created_files_and_publishes_event() {
        let (bus, orchestrator, mut ctx) = harness();
        let dir = tempfile::tempdir().unwrap();
        ctx.set_working_directory(dir.path().to_string_lossy().into_owned());

        let events = Arc::new(StdMutex::new(Vec::<Value>::new()));
        let sink = events.clone();
        bus.subscribe(
            subjects::COMMAND_EVENT,
            None,
            Arc::new(move |msg| sink.lock().unwrap().push(msg)),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::CommandExecute, json!({"command": "touch todo.txt"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        let created = ctx.get_str(keys::LAST_CREATED_FILE).unwrap();
        assert!(created.ends_with("/todo.txt"));
        assert_eq!(ctx.get_list(keys::CREATED_FILES).len(), 1);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event_type"], "command");
        assert_eq!(events[0]["exit_code"], 0);
        assert_eq!(events[0]["user"], "tester");
    }

    #[tokio::test]
    async fn mkdir_adopts_new_working_directory() {
        let (_bus, orchestrator, mut ctx) = harness();
        let dir = tempfile::tempdir().unwrap();
        ctx.set_working_directory(dir.path().to_string_lossy().into_owned());

        let mut a = action(
            ActionKind::CommandExecute,
            json!({"command": "mkdir -p projects/demo"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        assert!(ctx.working_directory.ends_with("projects/demo"));
        assert_eq!(
            ctx.get_str(keys::LAST_CREATED_DIR),
            Some(ctx.working_directory.as_str())
        );
        assert_eq!(ctx.get_list(keys::CREATED_DIRS).len(), 1);
    }

    #[tokio::test]
    async fn cd_changes_working_directory() {
        let (_bus, orchestrator, mut ctx) = harness();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        ctx.set_working_directory(dir.path().to_string_lossy().into_owned());

        let mut a = action(ActionKind::CommandExecute, json!({"command": "cd sub"}));
        orchestrator.execute_action(&mut a, &mut ctx).await;
        assert!(ctx.working_directory.ends_with("/sub"));
    }

    #[tokio::test]
    async fn redirection_target_becomes_last_created_file() {
        let (_bus, orchestrator, mut ctx) = harness();
        let dir = tempfile::tempdir().unwrap();
        ctx.set_working_directory(dir.path().to_string_lossy().into_owned());

        let mut a = action(
            ActionKind::CommandExecute,
            json!({"command": "echo hello > note.txt"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert!(result.success);
        assert!(ctx.get_str(keys::LAST_CREATED_FILE).unwrap().ends_with("/note.txt"));
    }

    #[tokio::test]
    async fn failing_command_carries_output_details() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(
            ActionKind::CommandExecute,
            json!({"command": "ls /definitely/not/here"}),
        );
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionFailure));
        assert!(result.details.get("returncode").is_some());
        assert!(
            ctx.get_variable(keys::LAST_COMMAND_EXIT_CODE).is_none(),
            "failed actions must not mutate context"
        );
    }

    #[tokio::test]
    async fn command_timeout_fails_and_publishes_no_event() {
        let bus = Arc::new(LocalBus::new());
        let mut timeouts = TimeoutConfig::default();
        timeouts.shell_secs = 1;
        let orchestrator = Orchestrator::new(bus.clone(), timeouts);
        let mut ctx = ConversationContext::new("tester@box", "tester");

        let events = Arc::new(AtomicU32::new(0));
        let counter = events.clone();
        bus.subscribe(
            subjects::COMMAND_EVENT,
            None,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::CommandExecute, json!({"command": "sleep 30"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionFailure));
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
        // No exit code means no observability event.
        assert_eq!(events.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_document_query_still_sets_empty_list() {
        let (bus, orchestrator, mut ctx) = harness();
        bus.reply_handler(
            subjects::FILE_SEARCH,
            reply_fn(|_| async { json!({"results": [], "count": 0}) }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::DocumentQuery, json!({"query": "nothing matches"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;

        assert!(result.success);
        assert_eq!(ctx.get_list(keys::LAST_QUERY_RESULTS).len(), 0);
        assert!(ctx.get_variable(keys::LAST_QUERY_RESULTS).is_some());
        assert_eq!(ctx.get_str(keys::LAST_QUERY), Some("nothing matches"));
    }

    #[tokio::test]
    async fn malformed_ocr_region_is_invalid_param() {
        let (_bus, orchestrator, mut ctx) = harness();
        let mut a = action(ActionKind::OcrCapture, json!({"region": "top-left-ish"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidParam));
    }

    #[tokio::test]
    async fn ocr_text_lands_in_context() {
        let (bus, orchestrator, mut ctx) = harness();
        bus.reply_handler(
            subjects::OCR_REQUEST,
            reply_fn(|req| async move {
                assert_eq!(req["region"], "10,20,300,40");
                json!({"text": "Total: 42.00", "confidence": 0.93})
            }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::OcrCapture, json!({"region": "10,20,300,40"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert!(result.success);
        assert_eq!(ctx.get_str(keys::LAST_OCR_TEXT), Some("Total: 42.00"));
    }

    #[tokio::test]
    async fn system_command_routes_to_named_subject() {
        let (bus, orchestrator, mut ctx) = harness();
        bus.reply_handler(
            "system.action.lock_screen",
            reply_fn(|_| async { json!({"locked": true}) }),
        )
        .await
        .unwrap();

        let mut a = action(ActionKind::SystemCommand, json!({"action": "lock_screen"}));
        let result = orchestrator.execute_action(&mut a, &mut ctx).await;
        assert!(result.success);
        assert_eq!(result.details.get("locked"), Some(&json!(true)));
    }

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        let s = "héllo".repeat(2000);
        let t = truncate_utf8(&s, COMMAND_OUTPUT_BOUND);
        assert!(t.len() <= COMMAND_OUTPUT_BOUND);
        assert!(t.is_char_boundary(t.len()));
    }
}
