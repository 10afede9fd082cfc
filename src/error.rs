//! Error types for the mreq client.

use crate::protocol::ErrorCode;
use crate::types::ValidationError;
use thiserror::Error;

/// Every failure the client surfaces to callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credentials or the session token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A project, item, folder, todo or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The category is not part of the project schema.
    #[error("unknown category: {0}")]
    InvalidCategory(String),

    /// The item was modified on the server since it was fetched.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server could not parse or run a query.
    #[error("query error: {0}")]
    Query(String),

    /// The connection failed or the peer sent something unreadable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The item failed client-side validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The server refused a request for a reason not covered above.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The part of the item was not fetched (see `FieldMask`).
    #[error("{0} were not loaded for this item")]
    NotLoaded(&'static str),

    /// The item has no field with this name.
    #[error("no field named '{0}'")]
    FieldNotFound(String),

    /// The field exists but holds a different kind of value.
    #[error("field '{name}' is not a {expected} field")]
    WrongFieldKind { name: String, expected: &'static str },

    /// A table row index is outside the table.
    #[error("row {row} is out of range (table has {rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    /// A server-side job failed.
    #[error("job failed: {0}")]
    Job(String),

    /// Credentials file missing, unreadable or lacking the requested key.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server answered with a response of the wrong shape.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

impl ClientError {
    /// Transport failures may succeed on retry; everything else is semantic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// Map a wire error code to the matching error kind.
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Auth => ClientError::Auth(message),
            ErrorCode::NotFound => ClientError::NotFound(message),
            ErrorCode::InvalidCategory => ClientError::InvalidCategory(message),
            ErrorCode::Conflict => ClientError::Conflict(message),
            ErrorCode::Query => ClientError::Query(message),
            ErrorCode::Job => ClientError::Job(message),
            ErrorCode::Invalid => ClientError::Rejected(message),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Transport(format!("malformed message: {}", e))
    }
}

/// Convenience alias that pins the error type to [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;
