//! Deterministic rule-table planner.
//!
//! Runs when the LLM plan cannot be parsed or when sanitization empties it.
//! One pattern group fires per utterance, mirroring a first-match rule
//! chain; the default is a history-aware `llm_generate`.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::info;

use nlx_context::{keys, ActionKind, ConversationContext, ResolvedValues};
use nlx_orchestrator::Action;

use crate::keywords::extract_music_prompt;

fn obj(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("rule params are always objects"),
    }
}

fn command_action(command: String) -> Action {
    let description = format!("Execute: {command}");
    Action::new(ActionKind::CommandExecute, obj(json!({"command": command})))
        .with_description(description)
        .with_approval(true)
}

macro_rules! rule_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("static regex"));
    };
}

rule_regex!(CREATE_FILE_1, r"create\s+(?:a\s+|an\s+)?([^\s]+)\s+file");
rule_regex!(CREATE_FILE_2, r"create\s+(?:a\s+)?file\s+(?:named|called)\s+([^\s]+)");
rule_regex!(CREATE_FILE_3, r"create\s+file\s+([^\s]+)");
rule_regex!(NAMED, r"named?\s+([^\s]+)");
rule_regex!(TOPIC_OF, r"of\s+(.+?)(?:\s+to|\s+in|$)");
rule_regex!(TARGET_FILE, r"(?:in|to)\s+([^\s]+)");
rule_regex!(DEST_FOLDER, r"to\s+(?:my\s+)?(.+?)(?:\s+folder|$)");
rule_regex!(IMAGE_PROMPT, r"image\s+(?:of\s+)?(.+?)(?:\s+and|\s+then|$)");
rule_regex!(DOC_QUERY, r"(?:search|find)(?:\s+my)?(?:\s+documents?)?(?:\s+for)?\s+(.+)");
rule_regex!(READ_FILE, r"(?:read|cat|show)\s+(.+?)(?:\s+file)?$");
rule_regex!(WEB_QUERY, r"(?:search|google|find)(?:\s+(?:for|the|web|internet))*\s+(.+)");
rule_regex!(LINK_NUM, r"(?:link|site|url|result)\s+(\d+)");
rule_regex!(APP_NAME, r"(?:open|launch|start)\s+(.+)");
rule_regex!(APP_SUFFIX, r"\s+(?:application|app|program|software)\s*$");
rule_regex!(DOC_NUM, r"(?:open|show|read|document|doc)\s+(\d+)");
rule_regex!(REGION, r"region\s+([\d,]+)");
rule_regex!(ANY_DIGIT, r"\d+");

/// Plan actions with the rule table. Always returns at least one action.
pub fn fallback_plan(
    user_input: &str,
    resolved: &ResolvedValues,
    context: &ConversationContext,
) -> (Vec<Action>, String) {
    info!("using fallback rule planning");

    let lower = user_input.to_lowercase();
    let mut actions: Vec<Action> = Vec::new();
    let mut explanation = "Processing your request".to_string();

    if lower.contains("create") && lower.contains("file") {
        // Most specific first: "file named X" must win over "a X file",
        // whose optional article can backtrack onto the word "a".
        if let Some(filename) = [&*CREATE_FILE_2, &*CREATE_FILE_3, &*CREATE_FILE_1, &*NAMED]
            .iter()
            .find_map(|re| re.captures(&lower).map(|c| c[1].to_string()))
        {
            let filename = filename.trim_end_matches('/').to_string();
            actions.push(command_action(format!("touch {filename}")));
            explanation = format!("Creating file {filename}");
        }
    } else if lower.contains("create")
        && (lower.contains("folder") || lower.contains("directory") || lower.contains("dir"))
    {
        if let Some(caps) = NAMED.captures(&lower) {
            let mut folder = caps[1].to_string();
            if !folder.starts_with('/') && !folder.starts_with('~') {
                folder = format!("~/{folder}");
            }
            actions.push(command_action(format!("mkdir -p {folder}")));
            explanation = format!("Creating directory {folder}");
        }
    } else if lower.contains("write") && (lower.contains("to") || lower.contains("in")) {
        // Generate content first when the request names a topic.
        if lower.contains("summary") || lower.contains("about") {
            let topic = TOPIC_OF
                .captures(&lower)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_else(|| "the requested topic".to_string());
            actions.push(
                Action::new(
                    ActionKind::LlmGenerate,
                    obj(json!({"prompt": format!("Write a concise summary about {topic}")})),
                )
                .with_description(format!("Generate summary about {topic}"))
                .with_approval(false),
            );
        }

        let mut file_path = resolved
            .get("file_path")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| context.get_str(keys::LAST_CREATED_FILE).map(String::from))
            .unwrap_or_else(|| "output.txt".to_string());
        // An explicit filename after "in"/"to" wins when it has an extension.
        if let Some(caps) = TARGET_FILE.captures(&lower) {
            let candidate = caps[1].trim_end_matches('/');
            if candidate.contains('.') && !candidate.ends_with('.') {
                file_path = candidate.to_string();
            }
        }

        let command = format!("cat > {file_path}");
        let description = format!("Execute: {command} (with generated content)");
        actions.push(
            Action::new(ActionKind::CommandExecute, obj(json!({"command": command})))
                .with_description(description)
                .with_approval(true),
        );
        explanation = format!("Writing content to {file_path}");
    } else if lower.contains("save")
        && (lower.contains("music")
            || lower.contains("song")
            || (lower.contains("it") && context.get_str(keys::LAST_GENERATED_MUSIC).is_some()))
    {
        let destination = DEST_FOLDER
            .captures(&lower)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "~/Music".to_string());
        let src = resolved
            .get("music_path")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| context.get_str(keys::LAST_GENERATED_MUSIC).map(String::from));
        if let Some(src) = src {
            actions.push(
                Action::new(
                    ActionKind::MusicSave,
                    obj(json!({"src_path": src, "dst_path": destination})),
                )
                .with_description(format!("Save music to {destination}"))
                .with_approval(true),
            );
            explanation = format!("Saving music to {destination}");
        }
    } else if lower.contains("generate") && lower.contains("image") {
        let prompt = IMAGE_PROMPT
            .captures(&lower)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "a beautiful scene".to_string());
        actions.push(
            Action::new(ActionKind::ImageGenerate, obj(json!({"prompt": prompt})))
                .with_description(format!("Generate image: {prompt}"))
                .with_approval(false),
        );
        explanation = format!("Generating image: {prompt}");
    } else if lower.contains("generate") && (lower.contains("music") || lower.contains("song")) {
        let prompt = extract_music_prompt(user_input, "an upbeat, happy song");
        actions.push(
            Action::new(ActionKind::MusicGenerate, obj(json!({"prompt": prompt})))
                .with_description(format!("Generate music: {prompt}"))
                .with_approval(true),
        );
        explanation = format!("Generating music: {prompt}");
    } else if lower.contains("save") && (lower.contains("image") || lower.contains("it")) {
        let destination = DEST_FOLDER
            .captures(&lower)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_else(|| "~/Pictures".to_string());
        let src = resolved
            .get("image_path")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| context.get_str(keys::LAST_GENERATED_IMAGE).map(String::from));
        if let Some(src) = src {
            actions.push(
                Action::new(
                    ActionKind::ImageSave,
                    obj(json!({"src_path": src, "dst_path": destination})),
                )
                .with_description(format!("Save image to {destination}"))
                .with_approval(true),
            );
            explanation = format!("Saving image to {destination}");
        }
    } else if lower.contains("list")
        && (lower.contains("file") || lower.contains("folder") || lower.contains("director"))
    {
        let path = if lower.contains("current") || lower.contains("here") {
            "."
        } else {
            "~"
        };
        actions.push(command_action(format!("ls -la {path}")));
        explanation = format!("Listing files in {path}");
    } else if lower.contains("search")
        && (lower.contains("document") || lower.contains("file") || lower.contains("my"))
    {
        if let Some(caps) = DOC_QUERY.captures(&lower) {
            let query = caps[1].trim().to_string();
            actions.push(
                Action::new(
                    ActionKind::DocumentQuery,
                    obj(json!({"query": query, "limit": 10})),
                )
                .with_description(format!("Search: {query}"))
                .with_approval(false),
            );
            explanation = format!("Searching documents for: {query}");
        }
    } else if (lower.contains("open") || lower.contains("visit") || lower.contains("go to"))
        && (lower.contains("link") || lower.contains("site") || lower.contains("url"))
    {
        if let Some(caps) = LINK_NUM.captures(&lower) {
            let n: usize = caps[1].parse().unwrap_or(0);
            let results = context.get_list(keys::LAST_SEARCH_RESULTS);
            if n >= 1 && n <= results.len() {
                if let Some(url) = results[n - 1].get("url").and_then(Value::as_str) {
                    if !url.is_empty() {
                        actions.push(command_action(format!("xdg-open '{url}'")));
                        explanation = format!("Opening link #{n}");
                    }
                }
            }
        }
    } else if lower.contains("search")
        && (lower.contains("web")
            || lower.contains("google")
            || lower.contains("duckduckgo")
            || lower.contains("internet"))
    {
        if let Some(caps) = WEB_QUERY.captures(&lower) {
            let query = caps[1].trim().to_string();
            actions.push(
                Action::new(ActionKind::WebSearch, obj(json!({"query": query, "limit": 5})))
                    .with_description(format!("Search web: {query}"))
                    .with_approval(false),
            );
            explanation = format!("Searching web for: {query}");
        }
    } else if (lower.contains("open") || lower.contains("launch") || lower.contains("start"))
        && !ANY_DIGIT.is_match(&lower)
        && !["document", "doc", "file", "folder", "directory", "path"]
            .iter()
            .any(|k| lower.contains(k))
        && !lower.contains("http://")
        && !lower.contains("https://")
        && !lower.contains("www.")
    {
        if let Some(caps) = APP_NAME.captures(&lower) {
            let app_name = APP_SUFFIX.replace(caps[1].trim(), "").to_string();
            if !looks_like_file_path(&app_name) {
                let command = libreoffice_command(&app_name)
                    .unwrap_or_else(|| format!("{app_name} &"));
                actions.push(command_action(command));
                explanation = format!("Opening {app_name}");
            }
        }
    } else if lower.contains("open") || lower.contains("show") || lower.contains("read") {
        if let Some(caps) = DOC_NUM.captures(&lower) {
            let n: usize = caps[1].parse().unwrap_or(0);
            let results = context.get_list(keys::LAST_QUERY_RESULTS);
            if n >= 1 && n <= results.len() {
                let path = results[n - 1]
                    .get("file_path")
                    .or_else(|| results[n - 1].get("path"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !path.is_empty() {
                    actions.push(command_action(format!("xdg-open '{path}'")));
                    explanation = format!("Opening document #{n}");
                }
            }
        } else if let Some(caps) = READ_FILE.captures(&lower) {
            let filename = caps[1].trim().to_string();
            actions.push(command_action(format!("cat {filename}")));
            explanation = format!("Reading file {filename}");
        }
    } else if lower.contains("ocr") || lower.contains("extract text") {
        let mut params = serde_json::Map::new();
        if lower.contains("window") {
            params.insert("window".into(), json!(true));
        } else if let Some(caps) = REGION.captures(&lower) {
            params.insert("region".into(), json!(caps[1].to_string()));
        }
        actions.push(
            Action::new(ActionKind::OcrCapture, params)
                .with_description("Capture text from screen")
                .with_approval(false),
        );
        explanation = "Capturing text via OCR".to_string();
    }

    // Nothing matched — hand the utterance to the LLM with history.
    if actions.is_empty() {
        actions.push(
            Action::new(
                ActionKind::LlmGenerate,
                obj(json!({"prompt": user_input, "use_history": true})),
            )
            .with_description("Process request")
            .with_approval(false),
        );
        explanation = "Processing your request".to_string();
    }

    (actions, explanation)
}

fn looks_like_file_path(name: &str) -> bool {
    const FILE_EXTS: &[&str] = &[
        "txt", "pdf", "doc", "docx", "odt", "png", "jpg", "jpeg", "gif", "svg", "mp4", "mp3",
        "wav", "ogg", "zip", "tar", "gz",
    ];
    name.contains('/')
        || name.starts_with('~')
        || name.starts_with('.')
        || name
            .rsplit_once('.')
            .map(|(_, ext)| FILE_EXTS.contains(&ext))
            .unwrap_or(false)
}

/// "libreoffice writer" → `libreoffice --writer &`. Unknown components are
/// passed through as flags too; libreoffice rejects them with its own error.
fn libreoffice_command(app_name: &str) -> Option<String> {
    let component = app_name.strip_prefix("libreoffice ")?.trim();
    Some(format!("libreoffice --{component} &"))
}
