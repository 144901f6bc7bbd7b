use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{info, warn};

use nlx_bus::{MessageBus, MessageCallback};
use nlx_context::{keys, ActionKind, ActionResult, ConversationContext, Role, Turn};
use nlx_core::subjects;
use nlx_core::NlxConfig;
use nlx_orchestrator::{is_deferred, Action, Orchestrator};
use nlx_planner::ActionPlanner;
use nlx_sessions::SessionStore;

use crate::response::{ExecutedAction, HandlerResponse, ResponseKind};
use crate::subst::{self, OutputChain};

/// High-level conversation coordinator for one session.
///
/// Integrates context management, planning, orchestration, the approval
/// gate, and persistence. A session is exclusively owned by its handler;
/// `process_message` calls are serialized by `&mut self`.
pub struct ConversationHandler {
    bus: Arc<dyn MessageBus>,
    store: Arc<SessionStore>,
    planner: ActionPlanner,
    orchestrator: Orchestrator,
    session_id: String,
    user_id: String,
    music_wait: Duration,
    archive_keep: usize,
    context: ConversationContext,
}

impl ConversationHandler {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<SessionStore>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        config: &NlxConfig,
    ) -> Self {
        let session_id = session_id.into();
        let user_id = user_id.into();
        let context = store.load(&session_id, &user_id);

        info!(
            %session_id,
            %user_id,
            turns = context.turns.len(),
            "conversation handler initialized"
        );

        Self {
            planner: ActionPlanner::new(bus.clone(), &config.timeouts),
            orchestrator: Orchestrator::new(bus.clone(), config.timeouts.clone()),
            bus,
            store,
            session_id,
            user_id,
            music_wait: Duration::from_secs(config.timeouts.music_wait_secs),
            archive_keep: config.session.archive_keep,
            context,
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Process one utterance: plan, gate on approval, execute, persist.
    pub async fn process_message(&mut self, user_input: &str, auto_approve: bool) -> HandlerResponse {
        info!(input = %truncate_for_log(user_input), "processing message");

        self.context.add_turn(Role::User, user_input, None);

        let (actions, explanation) = self.planner.plan_actions(user_input, &self.context).await;

        if actions.is_empty() {
            // Nothing to execute — the explanation is the reply.
            let message = if explanation.is_empty() {
                "I'm not sure how to help with that.".to_string()
            } else {
                explanation
            };
            self.context.add_turn(Role::Assistant, message.as_str(), None);
            self.persist();
            let mut response = HandlerResponse::success(message);
            response.context_updates = self.context.variables.clone();
            return response;
        }

        if !auto_approve && actions.iter().any(|a| a.needs_approval) {
            // Two-phase gate: hand the plan back for user consent. Nothing
            // runs and nothing persists until approval.
            let previews = actions.iter().map(preview).collect();
            return HandlerResponse {
                kind: ResponseKind::NeedsApproval,
                message: explanation,
                actions: previews,
                pending_actions: Some(actions),
                context_updates: BTreeMap::new(),
            };
        }

        self.run_cycle(actions).await
    }

    /// Execute previously planned actions after approval.
    ///
    /// `approved_indices = None` approves everything; otherwise only the
    /// listed indices run, in plan order.
    pub async fn approve_and_execute(
        &mut self,
        pending_actions: Vec<Action>,
        approved_indices: Option<&[usize]>,
    ) -> HandlerResponse {
        let actions: Vec<Action> = match approved_indices {
            None => pending_actions,
            Some(indices) => indices
                .iter()
                .filter_map(|&i| pending_actions.get(i).cloned())
                .collect(),
        };

        if actions.is_empty() {
            return HandlerResponse::cancelled("No actions were approved for execution.");
        }

        info!(count = actions.len(), "executing approved actions");
        self.run_cycle(actions).await
    }

    /// One execute cycle: output chaining, sequential execution, async
    /// music fan-in, summary, assistant turn, persistence.
    async fn run_cycle(&mut self, mut actions: Vec<Action>) -> HandlerResponse {
        // Subscribe before executing so an early async result is not lost.
        let inbox = self.open_music_inbox().await;

        let planned_total = actions.len();
        let had_music_generate = actions.iter().any(|a| a.kind == ActionKind::MusicGenerate);

        let mut chain = OutputChain::new();
        let mut executed: Vec<ExecutedAction> = Vec::new();
        let mut deferred_save: Option<Action> = None;
        let mut last_result: Option<ActionResult> = None;

        for index in 0..actions.len() {
            let action = &mut actions[index];

            subst::substitute_params(action, &chain, &self.context);
            subst::apply_stdin_rewrite(action, &chain);

            info!(
                step = index + 1,
                total = planned_total,
                kind = %action.kind,
                "executing plan step"
            );
            let result = self.orchestrator.execute_action(action, &mut self.context).await;

            // music_save with an unresolved source waits for the async
            // music result; it is not counted as executed yet.
            if action.kind == ActionKind::MusicSave && is_deferred(&result) {
                deferred_save = Some(action.clone());
                continue;
            }

            if result.success {
                match action.kind {
                    ActionKind::LlmGenerate => {
                        chain.set("llm_output", result.detail_str("content").unwrap_or_default());
                    }
                    ActionKind::ImageGenerate => {
                        chain.set("image_path", result.detail_str("image_path").unwrap_or_default());
                    }
                    _ => {}
                }
            }

            executed.push(ExecutedAction::from_result(action, &result));
            let failed_approved = !result.success && action.needs_approval;
            last_result = Some(result);

            if failed_approved {
                warn!(kind = %action.kind, "approved action failed, halting remaining plan");
                break;
            }
        }

        if had_music_generate {
            if let Some(save_result) = self
                .join_music_result(inbox, &mut executed, deferred_save.take())
                .await
            {
                last_result = Some(save_result);
            }
        }

        let (kind, message) = self.summarize(&executed, planned_total);
        self.context.add_turn(Role::Assistant, message.as_str(), last_result);
        self.persist();

        HandlerResponse {
            kind,
            message,
            actions: executed,
            pending_actions: None,
            context_updates: self.context.variables.clone(),
        }
    }

    /// Per-cycle inbox for `conversation.<session_id>`: the first message
    /// published there resolves the oneshot.
    async fn open_music_inbox(&self) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let callback: MessageCallback = Arc::new(move |msg| {
            if let Some(tx) = slot.lock().unwrap().take() {
                let _ = tx.send(msg);
            }
        });

        let subject = subjects::conversation(&self.session_id);
        if let Err(e) = self.bus.subscribe(&subject, None, callback).await {
            warn!(%subject, error = %e, "conversation subscription failed");
        }
        rx
    }

    /// Wait for the asynchronous `music_result`, then patch the executed
    /// entries and run the deferred save. Returns the save's result when it
    /// ran.
    async fn join_music_result(
        &mut self,
        inbox: oneshot::Receiver<Value>,
        executed: &mut Vec<ExecutedAction>,
        deferred_save: Option<Action>,
    ) -> Option<ActionResult> {
        let message = match tokio::time::timeout(self.music_wait, inbox).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => {
                warn!("conversation inbox closed before the music result arrived");
                return None;
            }
            Err(_) => {
                warn!("timeout waiting for music generation result");
                return None;
            }
        };

        if message.get("type").and_then(Value::as_str) != Some("music_result") {
            warn!("unexpected message on conversation subject while waiting for music");
            return None;
        }
        let Some(file_path) = message
            .get("file_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(String::from)
        else {
            return None;
        };

        self.context
            .set_variable(keys::LAST_GENERATED_MUSIC, file_path.as_str());

        for entry in executed
            .iter_mut()
            .filter(|e| e.action_type == "music_generate")
        {
            entry.details.insert("file_path".into(), json!(file_path));
            entry.details.insert("status".into(), json!("completed"));
            entry.success = true;
        }

        let mut save = deferred_save?;
        let src = save.param_str("src_path").unwrap_or("").to_string();
        if src.is_empty() || src.contains("{{last_generated_music}}") {
            save.set_param("src_path", file_path.as_str());
        }

        let result = self.orchestrator.execute_action(&mut save, &mut self.context).await;
        executed.push(ExecutedAction::from_result(&save, &result));
        Some(result)
    }

    /// Response-type selection over the executed actions.
    fn summarize(&self, executed: &[ExecutedAction], planned_total: usize) -> (ResponseKind, String) {
        let success_count = executed.iter().filter(|e| e.success).count();
        let executed_count = executed.len();

        if executed_count > 0 && success_count == 0 {
            let first_error = executed[0]
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            return (
                ResponseKind::Error,
                format!("Failed to execute actions: {first_error}"),
            );
        }
        if success_count < executed_count {
            return (
                ResponseKind::PartialSuccess,
                format!("Partially completed: {success_count}/{executed_count} actions succeeded."),
            );
        }
        if executed_count < planned_total {
            return (
                ResponseKind::PartialSuccess,
                format!("Completed {success_count} action(s). Waiting for remaining actions..."),
            );
        }

        // Single-LLM plans answer with the generated text itself.
        if executed_count == 1 && executed[0].action_type == "llm_generate" {
            let content = executed[0]
                .details
                .get("content")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .or_else(|| self.context.get_str(keys::LAST_GENERATED_TEXT).map(String::from))
                .unwrap_or_else(|| "Response generated successfully.".to_string());
            return (ResponseKind::Success, content);
        }

        if executed_count == 1 {
            let description = if executed[0].description.is_empty() {
                "Action"
            } else {
                &executed[0].description
            };
            return (
                ResponseKind::Success,
                format!("{description} completed successfully."),
            );
        }

        (
            ResponseKind::Success,
            format!("Completed {executed_count} actions successfully."),
        )
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    /// Conversation history, newest-last, optionally limited.
    pub fn conversation_history(&self, limit: Option<usize>) -> Vec<&Turn> {
        let start = limit
            .map(|n| self.context.turns.len().saturating_sub(n))
            .unwrap_or(0);
        self.context.turns[start..].iter().collect()
    }

    /// Compact context snapshot for display.
    pub fn context_summary(&self) -> Value {
        json!({
            "session_id": self.context.session_id,
            "turn_count": self.context.turns.len(),
            "variables": self.context.variables,
            "working_directory": self.context.working_directory,
            "last_updated": self.context.updated_at,
        })
    }

    /// Archive the current conversation, delete the live session, and start
    /// fresh.
    pub fn reset_conversation(&mut self) {
        if !self.context.turns.is_empty() {
            if let Err(e) = self
                .store
                .archive(&self.user_id, self.context.clone(), self.archive_keep)
            {
                warn!(error = %e, "conversation archive failed");
            }
        }
        if let Err(e) = self.store.reset(&self.session_id) {
            warn!(error = %e, "session reset failed");
        }
        self.context = self.store.load(&self.session_id, &self.user_id);
        info!(session_id = %self.session_id, "conversation reset");
    }

    fn persist(&mut self) {
        // Persistence failures are logged and swallowed — the response for
        // the current turn still goes out.
        if let Err(e) = self.store.save(&mut self.context) {
            warn!(session_id = %self.session_id, error = %e, "session persistence failed");
        }
    }
}

/// Pre-execution view of a planned action, shown in approval prompts.
fn preview(action: &Action) -> ExecutedAction {
    ExecutedAction {
        action_type: action.kind.as_str().to_string(),
        description: action.description.clone(),
        success: false,
        details: action.params.clone(),
        error: None,
    }
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(100).collect()
}
