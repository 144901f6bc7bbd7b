use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Not connected to the message bus")]
    NotConnected,

    #[error("No responders on subject: {0}")]
    NoResponders(String),

    #[error("Request timeout after {ms}ms on subject: {subject}")]
    Timeout { subject: String, ms: u64 },

    #[error("Connect failed after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
