//! Error types for ticketq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request shape or a stored payload that cannot become a ticket.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Lost a compare-and-transition race against another writer.
    #[error("concurrent update: {0}")]
    Conflict(String),

    #[error("client reference already in use: {0}")]
    DuplicateReference(String),

    #[error("dispatch queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a materialization failure is worth another attempt.
    ///
    /// An invalid payload fails the same way every time, so it is terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_) | Error::InvalidTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
