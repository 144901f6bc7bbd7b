use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use nlx_bus::MessageBus;
use nlx_context::{ConversationContext, ReferenceResolver, ResolvedValues};
use nlx_context::ActionKind;
use nlx_core::config::TimeoutConfig;
use nlx_core::subjects;
use nlx_orchestrator::Action;

use crate::{enrich, keywords, llm, quick, rules, sanitize};

static SAVE_DEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to\s+(?:my\s+)?(.+?)(?:\s+folder|$)").expect("static regex"));

/// Plans actions from user input and conversation context.
///
/// The planner is the only component that calls `llm_generate` recursively
/// (for the LLM-planned path); it never consumes approval itself.
pub struct ActionPlanner {
    bus: Arc<dyn MessageBus>,
    plan_timeout: Duration,
}

impl ActionPlanner {
    pub fn new(bus: Arc<dyn MessageBus>, timeouts: &TimeoutConfig) -> Self {
        Self {
            bus,
            plan_timeout: Duration::from_secs(timeouts.llm_plan_secs),
        }
    }

    /// Run the planning ladder. Returns the ordered actions plus a short
    /// human explanation.
    pub async fn plan_actions(
        &self,
        user_input: &str,
        context: &ConversationContext,
    ) -> (Vec<Action>, String) {
        info!(session = %context.session_id, input = user_input, "planning actions");

        // Numbered references bypass the LLM entirely — "open document 10"
        // must never become a search query.
        if let Some((actions, explanation)) = quick::try_quick_reference(user_input, context) {
            return (actions, explanation);
        }

        let lower = user_input.to_lowercase().trim().to_string();

        if keywords::is_informational_query(&lower) {
            return (vec![conversational_reply(user_input)], "Responding to your message".into());
        }

        if keywords::is_music_request(&lower) {
            return music_fast_path(user_input, &lower);
        }

        let (resolved_input, resolved_values) = if ReferenceResolver::needs_resolution(user_input) {
            let (text, values) = ReferenceResolver::resolve(user_input, context);
            debug!(?values, "resolved references");
            (text, values)
        } else {
            (user_input.to_string(), ResolvedValues::new())
        };

        let (mut actions, mut explanation, llm_planned) =
            match self.llm_plan(user_input, context, &resolved_values).await {
                Some((actions, explanation)) => (actions, explanation, true),
                None => {
                    // PlanParseError policy: fall back silently.
                    let (actions, explanation) =
                        rules::fallback_plan(user_input, &resolved_values, context);
                    (actions, explanation, false)
                }
            };

        if llm_planned {
            let (kept, dropped_any) = sanitize::sanitize_planned_actions(
                user_input,
                &resolved_input,
                &resolved_values,
                context,
                actions,
            );
            actions = kept;

            if dropped_any && actions.is_empty() {
                let (fallback_actions, fallback_explanation) =
                    rules::fallback_plan(user_input, &resolved_values, context);
                actions = fallback_actions;
                explanation = fallback_explanation;
            } else if dropped_any {
                explanation = sanitize::fix_explanation(explanation, &actions);
            }
        }

        for action in &mut actions {
            enrich::enrich_action_params(action, &resolved_values, context);
            enrich::fix_application_opening_command(action);
            enrich::ensure_music_prompt(action, user_input);
        }

        info!(count = actions.len(), explanation = %explanation, "planned actions");
        (actions, explanation)
    }

    async fn llm_plan(
        &self,
        user_input: &str,
        context: &ConversationContext,
        resolved_values: &ResolvedValues,
    ) -> Option<(Vec<Action>, String)> {
        let request = json!({
            "messages": [
                {"role": "system", "content": llm::build_planning_prompt(context, resolved_values)},
                {"role": "user", "content": llm::build_user_message(user_input)},
            ],
            "temperature": 0.2,
            "max_tokens": 300,
        });

        let reply = match self
            .bus
            .request(subjects::LLM_REQUEST, request, self.plan_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "llm action planning failed");
                return None;
            }
        };

        if let Some(err) = reply.get("error").and_then(Value::as_str) {
            warn!(error = err, "llm planner returned an error");
            return None;
        }

        let content = reply.get("content").and_then(Value::as_str)?;
        llm::parse_plan(content)
    }
}

/// Single history-aware `llm_generate` for greetings and questions.
fn conversational_reply(user_input: &str) -> Action {
    let params = match json!({
        "prompt": user_input,
        "use_history": true,
        "system_prompt": "You are Neuralux, a friendly and helpful AI assistant. \
            Respond naturally and conversationally. For greetings, be warm and welcoming. \
            For questions, answer directly, accurately, and concisely. \
            Be personable and helpful. Keep responses brief but complete.",
        "temperature": 0.7,
        "max_tokens": 300,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    Action::new(ActionKind::LlmGenerate, params)
        .with_description("Respond to user")
        .with_approval(false)
}

/// Music requests skip the planner LLM entirely. A save step is only chained
/// when the utterance asks for one.
fn music_fast_path(user_input: &str, lower: &str) -> (Vec<Action>, String) {
    // Strip the action prefix; a too-short extraction keeps the full
    // utterance (music models handle descriptive sentences fine).
    let prompt = keywords::extract_music_prompt(user_input, user_input.trim());

    let generate_params = match json!({"prompt": prompt}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    let mut actions = vec![Action::new(ActionKind::MusicGenerate, generate_params)
        .with_description(format!("Generate music: {prompt}"))
        .with_approval(true)];

    if keywords::mentions_save(lower) {
        let destination = SAVE_DEST
            .captures(lower)
            .map(|c| c[1].trim().to_string())
            .filter(|d| !d.is_empty() && d != "it")
            .unwrap_or_else(|| "~/Music".to_string());
        let save_params = match json!({
            "src_path": "{{last_generated_music}}",
            "dst_path": destination,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        actions.push(
            Action::new(ActionKind::MusicSave, save_params)
                .with_description(format!("Save generated music to {destination}"))
                .with_approval(true),
        );
        return (actions, format!("Generating music: {prompt} and saving it"));
    }

    (actions, format!("Generating music: {prompt}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlx_bus::bus::reply_fn;
    use nlx_bus::LocalBus;
    use nlx_context::keys;

    fn planner_with_bus() -> (Arc<LocalBus>, ActionPlanner) {
        let bus = Arc::new(LocalBus::new());
        let planner = ActionPlanner::new(bus.clone(), &TimeoutConfig::default());
        (bus, planner)
    }

    #[tokio::test]
    async fn greeting_plans_single_conversational_llm_call() {
        let (_bus, planner) = planner_with_bus();
        let ctx = ConversationContext::new("a@b", "a");
        let (actions, _) = planner.plan_actions("hello", &ctx).await;

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::LlmGenerate);
        assert!(!actions[0].needs_approval);
        assert_eq!(actions[0].param_str("prompt"), Some("hello"));
        assert!(actions[0].param_bool("use_history", false));
    }

    #[tokio::test]
    async fn music_with_save_chains_placeholder_save() {
        let (_bus, planner) = planner_with_bus();
        let ctx = ConversationContext::new("a@b", "a");
        let (actions, _) = planner
            .plan_actions("generate a heavy metal song and save it", &ctx)
            .await;

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::MusicGenerate);
        assert_eq!(actions[0].param_str("prompt"), Some("a heavy metal song"));
        assert!(actions[0].needs_approval);
        assert_eq!(actions[1].kind, ActionKind::MusicSave);
        assert_eq!(
            actions[1].param_str("src_path"),
            Some("{{last_generated_music}}")
        );
        assert_eq!(actions[1].param_str("dst_path"), Some("~/Music"));
    }

    #[tokio::test]
    async fn music_without_save_verb_plans_no_save() {
        let (_bus, planner) = planner_with_bus();
        let ctx = ConversationContext::new("a@b", "a");
        for input in ["generate a song, medieval style", "a pop song about a cat"] {
            let (actions, _) = planner.plan_actions(input, &ctx).await;
            assert!(
                actions.iter().all(|a| a.kind != ActionKind::MusicSave),
                "unexpected music_save for {input:?}"
            );
            assert_eq!(actions[0].kind, ActionKind::MusicGenerate);
        }
    }

    #[tokio::test]
    async fn implicit_music_keeps_full_utterance_as_prompt() {
        let (_bus, planner) = planner_with_bus();
        let ctx = ConversationContext::new("a@b", "a");
        let (actions, _) = planner.plan_actions("a pop song about a cat", &ctx).await;
        assert_eq!(actions[0].param_str("prompt"), Some("a pop song about a cat"));
    }

    #[tokio::test]
    async fn llm_plan_is_parsed_and_used() {
        let (bus, planner) = planner_with_bus();
        bus.reply_handler(
            subjects::LLM_REQUEST,
            reply_fn(|_| async {
                json!({"content": r#"{"explanation": "Creating file", "actions": [
                    {"action_type": "command_execute", "params": {"command": "touch notes.txt"},
                     "description": "Execute: touch notes.txt", "needs_approval": true}
                ]}"#})
            }),
        )
        .await
        .unwrap();

        let ctx = ConversationContext::new("a@b", "a");
        let (actions, explanation) = planner
            .plan_actions("create a file named notes.txt", &ctx)
            .await;
        assert_eq!(explanation, "Creating file");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].param_str("command"), Some("touch notes.txt"));
    }

    #[tokio::test]
    async fn unavailable_llm_falls_back_to_rules() {
        let (_bus, planner) = planner_with_bus();
        let ctx = ConversationContext::new("a@b", "a");
        let (actions, _) = planner
            .plan_actions("create a file named todo.txt", &ctx)
            .await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::CommandExecute);
        assert_eq!(actions[0].param_str("command"), Some("touch todo.txt"));
    }

    #[tokio::test]
    async fn hallucinated_music_is_sanitized_then_rules_take_over() {
        let (bus, planner) = planner_with_bus();
        bus.reply_handler(
            subjects::LLM_REQUEST,
            reply_fn(|_| async {
                json!({"content": r#"{"explanation": "Generating music", "actions": [
                    {"action_type": "music_generate", "params": {"prompt": "x"}, "needs_approval": true}
                ]}"#})
            }),
        )
        .await
        .unwrap();

        let ctx = ConversationContext::new("a@b", "a");
        let (actions, explanation) = planner
            .plan_actions("create a file named plan.txt", &ctx)
            .await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].param_str("command"), Some("touch plan.txt"));
        assert_eq!(explanation, "Creating file plan.txt");
    }

    #[tokio::test]
    async fn save_it_after_image_binds_source_via_fallback() {
        let (_bus, planner) = planner_with_bus();
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(keys::LAST_GENERATED_IMAGE, json!("/tmp/nlx/sunset.png"));

        let (actions, _) = planner
            .plan_actions("save it to my Pictures folder", &ctx)
            .await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::ImageSave);
        assert_eq!(actions[0].param_str("src_path"), Some("/tmp/nlx/sunset.png"));
    }

    #[tokio::test]
    async fn quick_reference_wins_over_everything() {
        let (bus, planner) = planner_with_bus();
        // A replier that would panic proves the LLM is never consulted.
        bus.reply_handler(
            subjects::LLM_REQUEST,
            reply_fn(|_| async { panic!("quick path must not reach the LLM") }),
        )
        .await
        .unwrap();

        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.set_variable(
            keys::LAST_QUERY_RESULTS,
            json!([{"file_path": "/home/a/report.odt"}]),
        );
        let (actions, _) = planner.plan_actions("open document 1", &ctx).await;
        assert_eq!(
            actions[0].param_str("command"),
            Some("xdg-open '/home/a/report.odt'")
        );
    }
}
