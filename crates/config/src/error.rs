//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Sources couldn't be read or didn't deserialize.
    #[display("failed to load configuration")]
    Load,
    /// Configuration loaded but is semantically wrong.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    #[display("configuration I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
