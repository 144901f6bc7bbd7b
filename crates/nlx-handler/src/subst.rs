//! In-plan output chaining and placeholder substitution.
//!
//! Two placeholder syntaxes travel through action parameters:
//! - `{{slot}}` — reserved slot identifiers filled from the output chain
//!   (`llm_output`, `image_path`, `music_path`);
//! - `{var}` — resolved against context variables first, the chain second.
//!
//! This is a tiny substitution pass, not a template language.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use nlx_context::ConversationContext;
use nlx_orchestrator::Action;

/// Outputs of earlier actions in the running plan, keyed by slot name.
#[derive(Debug, Default)]
pub struct OutputChain {
    slots: BTreeMap<String, String>,
}

impl OutputChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: &str, value: impl Into<String>) {
        self.slots.insert(slot.to_string(), value.into());
    }

    pub fn get(&self, slot: &str) -> Option<&str> {
        self.slots.get(slot).map(String::as_str)
    }
}

static SINGLE_BRACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

static REDIR_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*(.+)$").expect("static regex"));

/// Substitute placeholders in every string parameter of `action`.
pub fn substitute_params(action: &mut Action, chain: &OutputChain, context: &ConversationContext) {
    for value in action.params.values_mut() {
        let Value::String(s) = value else { continue };
        let substituted = substitute(s, chain, context);
        if &substituted != s {
            *value = Value::String(substituted);
        }
    }
}

fn substitute(input: &str, chain: &OutputChain, context: &ConversationContext) -> String {
    let mut out = input.to_string();

    // Double-brace slots first.
    if out.contains("{{llm_output}}") {
        if let Some(llm) = chain.get("llm_output") {
            out = out.replace("{{llm_output}}", llm);
        }
    }
    for slot in ["image_path", "music_path"] {
        let token = format!("{{{{{slot}}}}}");
        if out.contains(&token) {
            if let Some(value) = chain.get(slot) {
                out = out.replace(&token, value);
            }
        }
    }

    // Single-brace names: context variables first, chain second. Double
    // braces are left alone by checking the surrounding characters.
    let mut result = String::with_capacity(out.len());
    let mut last_end = 0;
    for caps in SINGLE_BRACE.captures_iter(&out) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];

        let preceded_by_brace = out[..whole.start()].ends_with('{');
        let followed_by_brace = out[whole.end()..].starts_with('}');
        if preceded_by_brace || followed_by_brace {
            continue;
        }

        let replacement = context
            .get_str(name)
            .map(String::from)
            .or_else(|| {
                context
                    .get_variable(name)
                    .filter(|v| !v.is_string())
                    .map(value_to_string)
            })
            .or_else(|| chain.get(name).map(String::from));

        if let Some(replacement) = replacement {
            result.push_str(&out[last_end..whole.start()]);
            result.push_str(&replacement);
            last_end = whole.end();
        }
    }
    result.push_str(&out[last_end..]);
    result
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Feed generated text into file-writing commands via stdin.
///
/// `echo '…' > F` becomes `cat > F` with the chain's `llm_output` attached
/// as stdin; an existing `cat > F` just gains the stdin.
pub fn apply_stdin_rewrite(action: &mut Action, chain: &OutputChain) {
    if action.kind != nlx_context::ActionKind::CommandExecute {
        return;
    }
    let Some(llm_output) = chain.get("llm_output").map(String::from) else {
        return;
    };
    let Some(command) = action.param_str("command").map(String::from) else {
        return;
    };

    if !(command.contains('>') || command.to_lowercase().contains("cat")) {
        return;
    }

    if command.starts_with("echo ") {
        if let Some(caps) = REDIR_TARGET.captures(&command) {
            let filename = caps[1].trim().to_string();
            action.set_param("command", format!("cat > {filename}").as_str());
            action.set_param("stdin", llm_output.as_str());
        }
    } else if command.contains("cat >") {
        action.set_param("stdin", llm_output.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlx_context::{keys, ActionKind};
    use serde_json::json;

    fn obj(v: Value) -> serde_json::Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn llm_output_slot_substitutes() {
        let mut chain = OutputChain::new();
        chain.set("llm_output", "generated text");
        let ctx = ConversationContext::new("a@b", "a");
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"stdin": "{{llm_output}}", "command": "cat > f.txt"})),
        );
        substitute_params(&mut action, &chain, &ctx);
        assert_eq!(action.param_str("stdin"), Some("generated text"));
    }

    #[test]
    fn single_brace_resolves_context_then_chain() {
        let mut chain = OutputChain::new();
        chain.set("image_path", "/tmp/from-chain.png");
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(keys::LAST_CREATED_FILE, json!("/home/a/notes.txt"));

        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "cp {last_created_file} {image_path}"})),
        );
        substitute_params(&mut action, &chain, &ctx);
        assert_eq!(
            action.param_str("command"),
            Some("cp /home/a/notes.txt /tmp/from-chain.png")
        );
    }

    #[test]
    fn unresolvable_single_brace_is_untouched() {
        let chain = OutputChain::new();
        let ctx = ConversationContext::new("a@b", "a");
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "echo {unknown_slot}"})),
        );
        substitute_params(&mut action, &chain, &ctx);
        assert_eq!(action.param_str("command"), Some("echo {unknown_slot}"));
    }

    #[test]
    fn double_brace_is_not_mangled_by_single_brace_pass() {
        let chain = OutputChain::new();
        let mut ctx = ConversationContext::new("a@b", "a");
        // Even with a same-named variable set, {{last_generated_music}} is a
        // reserved slot, not a single-brace lookup.
        ctx.set_variable("last_generated_music", json!("/tmp/x.wav"));
        let mut action = Action::new(
            ActionKind::MusicSave,
            obj(json!({"src_path": "{{unbound_slot}}", "dst_path": "~/Music"})),
        );
        substitute_params(&mut action, &chain, &ctx);
        assert_eq!(action.param_str("src_path"), Some("{{unbound_slot}}"));
    }

    #[test]
    fn echo_redirect_becomes_cat_with_stdin() {
        let mut chain = OutputChain::new();
        chain.set("llm_output", "1. idea one\n2. idea two\n");
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "echo 'placeholder' > todo.txt"})),
        );
        apply_stdin_rewrite(&mut action, &chain);
        assert_eq!(action.param_str("command"), Some("cat > todo.txt"));
        assert_eq!(action.param_str("stdin"), Some("1. idea one\n2. idea two\n"));
    }

    #[test]
    fn existing_cat_redirect_gains_stdin() {
        let mut chain = OutputChain::new();
        chain.set("llm_output", "body");
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "cat > summary.txt"})),
        );
        apply_stdin_rewrite(&mut action, &chain);
        assert_eq!(action.param_str("command"), Some("cat > summary.txt"));
        assert_eq!(action.param_str("stdin"), Some("body"));
    }

    #[test]
    fn commands_without_llm_output_are_untouched() {
        let chain = OutputChain::new();
        let mut action = Action::new(
            ActionKind::CommandExecute,
            obj(json!({"command": "echo 'hi' > f.txt"})),
        );
        apply_stdin_rewrite(&mut action, &chain);
        assert_eq!(action.param_str("command"), Some("echo 'hi' > f.txt"));
        assert!(action.param_str("stdin").is_none());
    }
}
