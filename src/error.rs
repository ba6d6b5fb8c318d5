//! Error types for scopeperm
//!
//! Permission checks never fail: they resolve to a boolean deny. These errors
//! cover the directory, login and configuration surfaces only.

use thiserror::Error;

/// The main error type for scopeperm operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermError {
    /// LMDB or serialization failure inside the user directory.
    #[error("store error: {0}")]
    Store(String),

    /// A user (or other record) that was expected to exist is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// A permission string that cannot be parsed was offered as a grant.
    #[error("invalid permission string: '{0}'")]
    InvalidPermission(String),

    /// Empty user id, or one containing the `/` key separator.
    #[error("invalid user id: '{0}'")]
    InvalidUserId(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Unknown, revoked or expired session token.
    #[error("invalid token")]
    InvalidToken,

    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for scopeperm operations
pub type Result<T> = std::result::Result<T, PermError>;

/// Convert any foreign error to a store error
pub(crate) fn err<E: std::error::Error>(e: E) -> PermError {
    PermError::Store(e.to_string())
}
