//! Semantic error type shared across the control plane.

use thiserror::Error;

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors carry the semantic kind the HTTP layer maps to a status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot delete: {0}")]
    CannotDelete(String),

    #[error("cannot cancel: {0}")]
    CannotCancel(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Error::AlreadyExists(what.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    /// True for the not-found kind; used where absence is an expected branch.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
