use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive not found: {user_id}/{id}")]
    ArchiveNotFound { user_id: String, id: i64 },
}

pub type Result<T> = std::result::Result<T, SessionError>;
