use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, warn};

use nlx_context::ConversationContext;

use crate::db::init_db;
use crate::error::{Result, SessionError};
use crate::types::ArchivedConversation;

/// SQLite-backed session store with TTL.
///
/// Wraps a single connection in a `Mutex` — sessions are single-writer by
/// construction (one handler per session id), so a pool buys nothing here.
pub struct SessionStore {
    db: Mutex<Connection>,
    ttl_secs: u64,
}

impl SessionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, ttl_secs: u64) -> Self {
        Self {
            db: Mutex::new(conn),
            ttl_secs,
        }
    }

    /// Open (creating parent directories and schema as needed) the database
    /// at `path`.
    pub fn open(path: &str, ttl_secs: u64) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self::new(conn, ttl_secs))
    }

    /// In-memory store, used by tests and `--ephemeral` runs.
    pub fn in_memory(ttl_secs: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::new(conn, ttl_secs))
    }

    /// Load a session, or return a freshly initialised empty one.
    ///
    /// Never errors toward the caller: expired rows are purged, corrupt
    /// payloads and backend failures degrade to a fresh context with a
    /// warning.
    pub fn load(&self, session_id: &str, user_id: &str) -> ConversationContext {
        match self.load_raw(session_id) {
            Ok(Some(raw)) => match ConversationContext::from_json(&raw) {
                Ok(ctx) => {
                    debug!(session_id, turns = ctx.turns.len(), "loaded session");
                    ctx
                }
                Err(e) => {
                    warn!(session_id, error = %e, "corrupt session payload, starting fresh");
                    ConversationContext::new(session_id, user_id)
                }
            },
            Ok(None) => ConversationContext::new(session_id, user_id),
            Err(e) => {
                warn!(session_id, error = %e, "session load failed, starting fresh");
                ConversationContext::new(session_id, user_id)
            }
        }
    }

    fn load_raw(&self, session_id: &str) -> Result<Option<String>> {
        let now = nlx_core::now_ms();
        let db = self.db.lock().unwrap();
        let row: Option<(String, i64)> = match db.query_row(
            "SELECT payload, expires_at FROM sessions WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(r) => Some(r),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(SessionError::Database(e)),
        };

        match row {
            Some((_, expires_at)) if expires_at <= now => {
                db.execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    rusqlite::params![session_id],
                )?;
                debug!(session_id, "purged expired session");
                Ok(None)
            }
            Some((payload, _)) => Ok(Some(payload)),
            None => Ok(None),
        }
    }

    /// Persist a session. Bumps `updated_at` and refreshes the TTL.
    pub fn save(&self, context: &mut ConversationContext) -> Result<()> {
        context.updated_at = nlx_core::now_ms().max(context.updated_at);
        let payload = context.to_json()?;
        let expires_at = nlx_core::now_ms() + (self.ttl_secs as i64) * 1000;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (session_id, payload, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE
             SET payload = excluded.payload, expires_at = excluded.expires_at",
            rusqlite::params![context.session_id, payload, expires_at],
        )?;
        debug!(session_id = %context.session_id, turns = context.turns.len(), "saved session");
        Ok(())
    }

    /// Delete the live session. Callers archive first when they want to keep
    /// the history.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            rusqlite::params![session_id],
        )?;
        Ok(())
    }

    /// Prepend a snapshot to the user's archive list, trimming to `max_keep`.
    pub fn archive(
        &self,
        user_id: &str,
        snapshot: ConversationContext,
        max_keep: usize,
    ) -> Result<()> {
        let archived = ArchivedConversation::from_context(snapshot);
        let payload = serde_json::to_string(&archived)?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO archives (user_id, id, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, archived.id, payload],
        )?;
        db.execute(
            "DELETE FROM archives
             WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM archives WHERE user_id = ?1
                 ORDER BY id DESC LIMIT ?2
             )",
            rusqlite::params![user_id, max_keep as i64],
        )?;
        Ok(())
    }

    /// Page through a user's archives, newest first. Backend errors read as
    /// an empty list.
    pub fn list_archives(
        &self,
        user_id: &str,
        start: usize,
        count: usize,
    ) -> Vec<ArchivedConversation> {
        let result = (|| -> Result<Vec<ArchivedConversation>> {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT payload FROM archives WHERE user_id = ?1
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            )?;
            let rows =
                stmt.query_map(rusqlite::params![user_id, count as i64, start as i64], |row| {
                    row.get::<_, String>(0)
                })?;
            Ok(rows
                .filter_map(|r| r.ok())
                .filter_map(|raw| serde_json::from_str(&raw).ok())
                .collect())
        })();

        match result {
            Ok(list) => list,
            Err(e) => {
                warn!(user_id, error = %e, "archive listing failed");
                Vec::new()
            }
        }
    }

    /// Fetch one archive by id.
    pub fn get_archive(&self, user_id: &str, id: i64) -> Result<ArchivedConversation> {
        let db = self.db.lock().unwrap();
        let raw: String = db
            .query_row(
                "SELECT payload FROM archives WHERE user_id = ?1 AND id = ?2",
                rusqlite::params![user_id, id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => SessionError::ArchiveNotFound {
                    user_id: user_id.to_string(),
                    id,
                },
                other => SessionError::Database(other),
            })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlx_context::{keys, Role};
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::in_memory(24 * 3600).unwrap()
    }

    #[test]
    fn save_then_load_roundtrips() {
        let store = store();
        let mut ctx = ConversationContext::new("alice@box", "alice");
        ctx.add_turn(Role::User, "hello", None);
        ctx.set_variable(keys::LAST_GENERATED_TEXT, json!("hi!"));
        store.save(&mut ctx).unwrap();

        let back = store.load("alice@box", "alice");
        assert_eq!(back.turns.len(), 1);
        assert_eq!(back.get_str(keys::LAST_GENERATED_TEXT), Some("hi!"));
        assert_eq!(back.created_at, ctx.created_at);
        assert_eq!(back.updated_at, ctx.updated_at);
    }

    #[test]
    fn missing_session_loads_fresh_with_home_cwd() {
        let store = store();
        let ctx = store.load("nobody@box", "nobody");
        assert!(ctx.turns.is_empty());
        assert!(!ctx.working_directory.is_empty());
    }

    #[test]
    fn corrupt_payload_degrades_to_fresh_session() {
        let store = store();
        {
            let db = store.db.lock().unwrap();
            db.execute(
                "INSERT INTO sessions (session_id, payload, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params!["bad@box", "{not json", i64::MAX],
            )
            .unwrap();
        }
        let ctx = store.load("bad@box", "bad");
        assert!(ctx.turns.is_empty());
    }

    #[test]
    fn expired_session_is_purged_on_load() {
        let store = SessionStore::in_memory(0).unwrap();
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.add_turn(Role::User, "hello", None);
        store.save(&mut ctx).unwrap();

        let back = store.load("a@b", "a");
        assert!(back.turns.is_empty());
    }

    #[test]
    fn reset_deletes_the_live_session() {
        let store = store();
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.add_turn(Role::User, "hello", None);
        store.save(&mut ctx).unwrap();
        store.reset("a@b").unwrap();
        assert!(store.load("a@b", "a").turns.is_empty());
    }

    #[test]
    fn archive_list_is_bounded_and_newest_first() {
        let store = store();
        for i in 0..5 {
            let mut ctx = ConversationContext::new("a@b", "a");
            ctx.add_turn(Role::User, format!("conversation {i}"), None);
            ctx.updated_at = 1000 + i;
            store.archive("a", ctx, 3).unwrap();
        }

        let archives = store.list_archives("a", 0, 10);
        assert_eq!(archives.len(), 3);
        assert_eq!(archives[0].title, "conversation 4");
        assert_eq!(archives[2].title, "conversation 2");
    }

    #[test]
    fn get_archive_roundtrips_the_snapshot() {
        let store = store();
        let mut ctx = ConversationContext::new("a@b", "a");
        ctx.add_turn(Role::User, "remember this one", None);
        ctx.updated_at = 42_000;
        store.archive("a", ctx, 50).unwrap();

        let archived = store.get_archive("a", 42_000).unwrap();
        assert_eq!(archived.context.turns.len(), 1);
        assert_eq!(archived.title, "remember this one");

        assert!(matches!(
            store.get_archive("a", 7),
            Err(SessionError::ArchiveNotFound { .. })
        ));
    }
}
