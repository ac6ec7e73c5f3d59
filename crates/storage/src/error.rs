//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Resource does not exist in the consulted store.
    #[display("resource not found: /{_0}")]
    NotFound(#[error(not(source))] String),
    /// A file operation was attempted on a collection.
    #[display("is a directory: /{_0}")]
    IsADirectory(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: /{_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Backend unreachable, timed out, or answered with an unexpected status.
    #[display("transport failure: {_0}")]
    Transport(#[error(not(source))] String),
    /// Backend answered with a body that could not be understood.
    #[display("protocol error: {_0}")]
    Protocol(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_absolute_form() {
        assert_eq!(ErrorKind::NotFound("a/b.txt".to_string()).to_string(), "resource not found: /a/b.txt");
        assert_eq!(ErrorKind::IsADirectory(String::new()).to_string(), "is a directory: /");
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Transport("timed out".to_string()).is_retryable());
        assert!(!ErrorKind::Protocol("bad xml".to_string()).is_retryable());
        assert!(!ErrorKind::NotFound("x".to_string()).is_retryable());
    }
}
