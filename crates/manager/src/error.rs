//! Manager Error Types
//!
//! Storage failures are re-raised into the matching kind here, so callers
//! (the CLI, a protocol gateway) only ever match on one enum. The storage
//! error stays attached as the child frame.

use davcache_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use derive_more::{Display, Error};

/// A manager error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Absent from every store that was consulted.
    #[display("not found: /{_0}")]
    NotFound(#[error(not(source))] String),
    /// A file operation was attempted on a collection.
    #[display("is a directory: /{_0}")]
    IsADirectory(#[error(not(source))] String),
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    #[display("permission denied: /{_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Backend unreachable or answered with an unexpected status.
    #[display("backend transport failure")]
    Transport,
    /// Backend answered with something that couldn't be understood.
    #[display("backend protocol error")]
    Protocol,
    #[display("local I/O error")]
    Io,
    #[display("path index error")]
    Index,
    #[display("configuration error")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed. Nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Io | Self::Index)
    }

    /// The manager kind matching a storage kind.
    pub fn from_storage(kind: &StorageErrorKind) -> Self {
        match kind {
            StorageErrorKind::NotFound(path) => Self::NotFound(path.clone()),
            StorageErrorKind::IsADirectory(path) => Self::IsADirectory(path.clone()),
            StorageErrorKind::PermissionDenied(path) => Self::PermissionDenied(path.clone()),
            StorageErrorKind::InvalidPath(path) => Self::InvalidPath(path.clone()),
            StorageErrorKind::Io(_) => Self::Io,
            StorageErrorKind::Transport(_) => Self::Transport,
            StorageErrorKind::Protocol(_) => Self::Protocol,
        }
    }
}

/// Re-raise storage results into manager results.
pub(crate) trait StorageResultExt<T> {
    fn or_storage(self) -> Result<T>;
}
impl<T> StorageResultExt<T> for StorageResult<T> {
    #[track_caller]
    fn or_storage(self) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                let kind = ErrorKind::from_storage(&err);
                Err(err.raise(kind))
            },
        }
    }
}
