//! Error types for mondo

use thiserror::Error;

/// Core error type for mondo operations.
///
/// Variants follow the error taxonomy of the backend contract: validation
/// failures are never retried, conflicts carry the duplicate-key code, and
/// transient failures are only retried by the proxy backend.
#[derive(Error, Debug)]
pub enum MondoError {
    #[error("Illegal name: {0}")]
    IllegalName(String),

    #[error("Bad value: {0}")]
    BadValue(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Cursor not found: {0}")]
    CursorNotFound(i64),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Error reported by a remote backend, code preserved verbatim.
    #[error("Remote error (code {code}): {message}")]
    Remote {
        code: i32,
        code_name: Option<String>,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MondoError {
    /// MongoDB-compatible error code surfaced over the wire.
    pub fn code(&self) -> i32 {
        match self {
            MondoError::IllegalName(_) | MondoError::BadValue(_) => 2,
            MondoError::Unauthorized(_) => 13,
            MondoError::NamespaceNotFound(_) => 26,
            MondoError::CursorNotFound(_) => 43,
            MondoError::CommandNotFound(_) => 59,
            MondoError::DuplicateKey(_) => 11000,
            MondoError::Remote { code, .. } => *code,
            _ => 1,
        }
    }

    /// Symbolic name matching `code()`.
    pub fn code_name(&self) -> &str {
        match self {
            MondoError::IllegalName(_) | MondoError::BadValue(_) => "BadValue",
            MondoError::Unauthorized(_) => "Unauthorized",
            MondoError::NamespaceNotFound(_) => "NamespaceNotFound",
            MondoError::CursorNotFound(_) => "CursorNotFound",
            MondoError::CommandNotFound(_) => "CommandNotFound",
            MondoError::DuplicateKey(_) => "DuplicateKey",
            MondoError::Remote { code_name, .. } => {
                code_name.as_deref().unwrap_or("UnknownError")
            }
            _ => "InternalError",
        }
    }
}

/// Result type alias for mondo operations.
pub type Result<T> = std::result::Result<T, MondoError>;
