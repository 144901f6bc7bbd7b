use serde::{Deserialize, Serialize};

use nlx_context::{ConversationContext, Role};

/// Maximum synthesized title length (characters).
const TITLE_MAX_CHARS: usize = 80;

/// Immutable snapshot of a session, written on reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedConversation {
    /// Snapshot identifier — the context's `updated_at` at archive time,
    /// unique per user in practice (millisecond resolution).
    pub id: i64,
    /// When the archive row was written (epoch ms).
    pub updated_at: i64,
    /// First user turn, truncated, for list display.
    pub title: String,
    /// The full context snapshot.
    pub context: ConversationContext,
}

impl ArchivedConversation {
    pub fn from_context(context: ConversationContext) -> Self {
        let title = context
            .turns
            .iter()
            .find(|t| matches!(t.role, Role::User) && !t.content.trim().is_empty())
            .map(|t| truncate_chars(t.content.trim(), TITLE_MAX_CHARS))
            .unwrap_or_default();

        Self {
            id: context.updated_at,
            updated_at: nlx_core::now_ms(),
            title,
            context,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_comes_from_first_user_turn() {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.add_turn(Role::Assistant, "welcome", None);
        ctx.add_turn(Role::User, "generate an image of a sunset", None);
        let archive = ArchivedConversation::from_context(ctx);
        assert_eq!(archive.title, "generate an image of a sunset");
    }

    #[test]
    fn long_title_is_truncated() {
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.add_turn(Role::User, "x".repeat(200), None);
        let archive = ArchivedConversation::from_context(ctx);
        assert_eq!(archive.title.chars().count(), 80);
    }

    #[test]
    fn empty_session_yields_empty_title() {
        let ctx = ConversationContext::new("a@b", "a");
        let archive = ArchivedConversation::from_context(ctx);
        assert!(archive.title.is_empty());
    }
}
