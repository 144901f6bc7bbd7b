//! Quick reference patterns — numbered references to prior search results.
//!
//! These run before any LLM involvement: "open document 10" after a document
//! query must open result #10, never become a new search query.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use nlx_context::{keys, ConversationContext};
use nlx_orchestrator::Action;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:link|site|url|result)\s+(\d+)").expect("static regex"));

static DOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:open|show|read|document|doc)\s+(?:document\s+|doc\s+)?(\d+)")
        .expect("static regex")
});

/// Try the deterministic reference lookups. Returns `None` when no pattern
/// fires so the planning ladder continues.
pub fn try_quick_reference(
    user_input: &str,
    context: &ConversationContext,
) -> Option<(Vec<Action>, String)> {
    let lower = user_input.to_lowercase();

    // "open link 1", "visit site 2" — after a web search.
    if lower.contains("link") || lower.contains("site") || lower.contains("url") {
        if let Some(caps) = LINK_RE.captures(&lower) {
            let n: usize = caps[1].parse().ok()?;
            let results = context.get_list(keys::LAST_SEARCH_RESULTS);
            if n >= 1 && n <= results.len() {
                if let Some(url) = results[n - 1].get("url").and_then(Value::as_str) {
                    if !url.is_empty() {
                        return Some((
                            vec![xdg_open(url)],
                            format!("Opening link #{n}"),
                        ));
                    }
                }
            }
        }
    }

    // "open 1", "show doc 2", "read document 3" — after a document query.
    if lower.contains("open") || lower.contains("show") || lower.contains("read") {
        if let Some(caps) = DOC_RE.captures(&lower) {
            let n: usize = caps[1].parse().ok()?;
            let results = context.get_list(keys::LAST_QUERY_RESULTS);
            if n >= 1 && n <= results.len() {
                let path = results[n - 1]
                    .get("file_path")
                    .or_else(|| results[n - 1].get("path"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !path.is_empty() {
                    return Some((
                        vec![xdg_open(path)],
                        format!("Opening document #{n}"),
                    ));
                }
            }
        }
    }

    None
}

/// Open a URL or document in its default application. Always approved by
/// the user first.
fn xdg_open(target: &str) -> Action {
    let command = format!("xdg-open '{target}'");
    let params = match json!({"command": command}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    Action::new(nlx_context::ActionKind::CommandExecute, params)
        .with_description(format!("Execute: {command}"))
        .with_approval(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlx_context::ActionKind;
    use serde_json::json;

    fn context_with_search_results() -> ConversationContext {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(
            keys::LAST_SEARCH_RESULTS,
            json!([
                {"title": "Rust", "url": "https://www.rust-lang.org/", "snippet": ""},
                {"title": "Book", "url": "https://doc.rust-lang.org/book/", "snippet": ""},
            ]),
        );
        ctx
    }

    #[test]
    fn open_link_n_binds_url_from_results() {
        let ctx = context_with_search_results();
        let (actions, explanation) = try_quick_reference("open link 2", &ctx).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::CommandExecute);
        assert!(actions[0].needs_approval);
        assert_eq!(
            actions[0].param_str("command"),
            Some("xdg-open 'https://doc.rust-lang.org/book/'")
        );
        assert_eq!(explanation, "Opening link #2");
    }

    #[test]
    fn out_of_range_link_falls_through() {
        let ctx = context_with_search_results();
        assert!(try_quick_reference("open link 9", &ctx).is_none());
    }

    #[test]
    fn open_document_n_accepts_both_path_fields() {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(
            keys::LAST_QUERY_RESULTS,
            json!([{"path": "/home/a/notes.odt", "filename": "notes.odt"}]),
        );
        let (actions, _) = try_quick_reference("open document 1", &ctx).unwrap();
        assert_eq!(
            actions[0].param_str("command"),
            Some("xdg-open '/home/a/notes.odt'")
        );
    }

    #[test]
    fn no_context_means_no_quick_action() {
        let ctx = ConversationContext::new("a@b", "a");
        assert!(try_quick_reference("open link 1", &ctx).is_none());
        assert!(try_quick_reference("open document 1", &ctx).is_none());
    }
}
