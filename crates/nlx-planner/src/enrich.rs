//! Post-planning parameter enrichment.
//!
//! Placeholders for already-known context values are substituted here;
//! `{{llm_output}}` and friends stay untouched for the handler's in-plan
//! output chain. A placeholder whose variable is unset is left alone so the
//! orchestrator can defer or fail it explicitly.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use nlx_context::{keys, ActionKind, ConversationContext, ResolvedValues};
use nlx_orchestrator::Action;

use crate::keywords::extract_music_prompt;

/// Context-variable placeholders resolvable at planning time.
const PLACEHOLDER_KEYS: &[(&str, &str)] = &[
    ("{{last_created_file}}", keys::LAST_CREATED_FILE),
    ("{{last_generated_image}}", keys::LAST_GENERATED_IMAGE),
    ("{{last_generated_music}}", keys::LAST_GENERATED_MUSIC),
    ("{{last_ocr_text}}", keys::LAST_OCR_TEXT),
];

/// Substitute known placeholders and merge resolved reference slots into
/// missing parameters.
pub fn enrich_action_params(
    action: &mut Action,
    resolved: &ResolvedValues,
    context: &ConversationContext,
) {
    for value in action.params.values_mut() {
        let Value::String(s) = value else { continue };
        let mut replaced = s.clone();
        for (placeholder, key) in PLACEHOLDER_KEYS {
            if replaced.contains(placeholder) {
                if let Some(current) = context.get_str(key) {
                    replaced = replaced.replace(placeholder, current);
                }
            }
        }
        if &replaced != s {
            *value = Value::String(replaced);
        }
    }

    // Resolved anaphora fill gaps the planner left open.
    if action.kind == ActionKind::ImageSave && action.param_str("src_path").is_none() {
        if let Some(path) = resolved.get("image_path").and_then(Value::as_str) {
            action.set_param("src_path", path);
        }
    }
    if action.kind == ActionKind::MusicSave && action.param_str("src_path").is_none() {
        if let Some(path) = resolved.get("music_path").and_then(Value::as_str) {
            action.set_param("src_path", path);
        }
    }
}

/// Make sure every `music_generate` carries a prompt, re-extracting from the
/// utterance when the planner dropped it.
pub fn ensure_music_prompt(action: &mut Action, user_input: &str) {
    if action.kind == ActionKind::MusicGenerate && action.param_str("prompt").is_none() {
        let prompt = extract_music_prompt(user_input, user_input.trim());
        action.set_param("prompt", prompt);
    }
}

static XDG_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^xdg-open\s+([^'"\s]+)\s*$"#).expect("static regex"));
static XDG_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^xdg-open\s+["']?(.+?)["']?\s*$"#).expect("static regex"));
static XDG_IN_DESC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"xdg-open\s+["']?[^"']+["']?"#).expect("static regex"));

const FILE_EXTS: &[&str] = &[
    "txt", "pdf", "doc", "docx", "odt", "png", "jpg", "jpeg", "gif", "svg", "mp4", "mp3", "wav",
    "ogg", "zip", "tar", "gz",
];

/// Rewrite `xdg-open <app>` to `<app> &`.
///
/// xdg-open treats bare application names as file paths and fails; URLs,
/// paths, and documents keep xdg-open.
pub fn fix_application_opening_command(action: &mut Action) {
    if action.kind != ActionKind::CommandExecute {
        return;
    }
    let Some(command) = action.param_str("command").map(str::trim).map(String::from) else {
        return;
    };

    let target = XDG_BARE
        .captures(&command)
        .or_else(|| XDG_QUOTED.captures(&command))
        .map(|c| c[1].to_string());
    let Some(target) = target else { return };

    let is_url = target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("file://");
    // .desktop files are exactly what xdg-open is for.
    let is_file_path = target.contains('/')
        || target.starts_with('~')
        || target.starts_with('.')
        || target.ends_with(".desktop")
        || target
            .rsplit_once('.')
            .map(|(_, ext)| FILE_EXTS.contains(&ext))
            .unwrap_or(false);

    if is_url || is_file_path {
        return;
    }

    let new_command = format!("{target} &");
    debug!(original = %command, fixed = %new_command, "fixed application command");
    action.set_param("command", new_command.as_str());
    if !action.description.is_empty() {
        action.description = XDG_IN_DESC
            .replace_all(&action.description, new_command.as_str())
            .into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> serde_json::Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn set_placeholder_is_substituted() {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(keys::LAST_GENERATED_IMAGE, json!("/tmp/sunset.png"));
        let mut action = Action::new(
            ActionKind::ImageSave,
            obj(json!({"src_path": "{{last_generated_image}}", "dst_path": "~/Pictures"})),
        );
        enrich_action_params(&mut action, &Default::default(), &ctx);
        assert_eq!(action.param_str("src_path"), Some("/tmp/sunset.png"));
    }

    #[test]
    fn unset_placeholder_is_left_for_the_orchestrator() {
        let ctx = ConversationContext::new("a@b", "a");
        let mut action = Action::new(
            ActionKind::MusicSave,
            obj(json!({"src_path": "{{last_generated_music}}", "dst_path": "~/Music"})),
        );
        enrich_action_params(&mut action, &Default::default(), &ctx);
        assert_eq!(action.param_str("src_path"), Some("{{last_generated_music}}"));
    }

    #[test]
    fn resolved_slot_fills_missing_src_path() {
        let ctx = ConversationContext::new("a@b", "a");
        let mut resolved = ResolvedValues::new();
        resolved.insert("image_path".into(), json!("/tmp/gen.png"));
        let mut action = Action::new(
            ActionKind::ImageSave,
            obj(json!({"dst_path": "~/Pictures"})),
        );
        enrich_action_params(&mut action, &resolved, &ctx);
        assert_eq!(action.param_str("src_path"), Some("/tmp/gen.png"));
    }

    #[test]
    fn xdg_open_application_is_rewritten() {
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "xdg-open firefox"})),
        )
        .with_description("Execute: xdg-open firefox");
        fix_application_opening_command(&mut action);
        assert_eq!(action.param_str("command"), Some("firefox &"));
        assert_eq!(action.description, "Execute: firefox &");
    }

    #[test]
    fn xdg_open_urls_and_documents_are_kept() {
        for command in [
            "xdg-open 'https://www.rust-lang.org/'",
            "xdg-open ~/Documents/report.pdf",
            "xdg-open notes.txt",
            "xdg-open launcher.desktop",
        ] {
            let mut action = Action::new(
                ActionKind::CommandExecute,
                obj(json!({"command": command})),
            );
            fix_application_opening_command(&mut action);
            assert_eq!(action.param_str("command"), Some(command), "{command}");
        }
    }

    #[test]
    fn music_prompt_is_backfilled() {
        let mut action = Action::new(ActionKind::MusicGenerate, Default::default());
        ensure_music_prompt(&mut action, "generate a song, soft jazz");
        assert_eq!(action.param_str("prompt"), Some("soft jazz"));
    }
}
