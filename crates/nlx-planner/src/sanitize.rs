//! Plan sanitization — strip actions that contradict the user request.
//!
//! The planner LLM occasionally hallucinates a music or image step onto an
//! unrelated request. Dropping here is cheap; the caller falls back to the
//! deterministic planner when nothing survives.

use tracing::{info, warn};

use nlx_context::{keys, ActionKind, ConversationContext, ResolvedValues};
use nlx_orchestrator::Action;

use crate::keywords;

/// Remove contradictory actions. Returns the surviving actions and whether
/// anything was dropped.
pub fn sanitize_planned_actions(
    user_input: &str,
    resolved_input: &str,
    resolved_values: &ResolvedValues,
    context: &ConversationContext,
    actions: Vec<Action>,
) -> (Vec<Action>, bool) {
    let combined = format!("{user_input} {resolved_input}").to_lowercase();
    let mentions_music = keywords::mentions_music(&combined);
    let mentions_image = keywords::mentions_image(&combined);
    let mentions_save = keywords::mentions_save(&combined);

    let has_context_music = context.get_str(keys::LAST_GENERATED_MUSIC).is_some()
        || resolved_values.contains_key("music_path");
    let has_context_image = context.get_str(keys::LAST_GENERATED_IMAGE).is_some()
        || resolved_values.contains_key("image_path");

    let mut sanitized = Vec::new();
    let mut dropped_any = false;

    for action in actions {
        match action.kind {
            ActionKind::MusicGenerate | ActionKind::MusicSave if !mentions_music => {
                warn!(user_input, description = %action.description, "dropping unrelated music action");
                dropped_any = true;
            }
            ActionKind::MusicSave if !(mentions_save || has_context_music) => {
                info!(user_input, description = %action.description, "dropping music save without context");
                dropped_any = true;
            }
            ActionKind::ImageSave if !mentions_save => {
                info!(user_input, description = %action.description, "dropping image save without user request");
                dropped_any = true;
            }
            ActionKind::ImageSave if !(mentions_image || has_context_image) => {
                info!(user_input, description = %action.description, "dropping image save without context");
                dropped_any = true;
            }
            ActionKind::ImageGenerate if !mentions_image => {
                info!(user_input, description = %action.description, "dropping image generate without prompt");
                dropped_any = true;
            }
            _ => sanitized.push(action),
        }
    }

    (sanitized, dropped_any)
}

/// After drops, make sure the explanation still matches what remains.
pub fn fix_explanation(explanation: String, actions: &[Action]) -> String {
    let has_music = actions.iter().any(|a| {
        matches!(a.kind, ActionKind::MusicGenerate | ActionKind::MusicSave)
    });
    if explanation.to_lowercase().contains("music") && !has_music {
        return "Processing your request".to_string();
    }
    if explanation.is_empty() {
        return "Processing your request".to_string();
    }
    explanation
}
