//! These types represent both index rows (for the path index) and storage
//! backend metadata (for stat and listing operations).

use time::OffsetDateTime;

/// Resource metadata returned by storage backends and stored in the index.
///
/// Never persisted as-is by a backend: every observation that produces one
/// is folded back into the path index by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Normalized path relative to the storage root (`""` is the root).
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes, always zero for directories.
    pub size: u64,
    /// Content digest or backend-supplied entity tag, used for change detection.
    pub fingerprint: Option<String>,
    pub modified: OffsetDateTime,
}
impl ResourceMeta {
    /// Metadata for a file.
    pub fn file(path: impl Into<String>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
            size,
            fingerprint: None,
            modified,
        }
    }

    /// Metadata for a directory (size zero, no fingerprint).
    pub fn directory(path: impl Into<String>, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            size: 0,
            fingerprint: None,
            modified,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Same metadata, re-addressed at another path with a refreshed timestamp.
    pub fn relocated(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            modified: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }

    /// Same metadata with a refreshed timestamp.
    pub fn touched(mut self) -> Self {
        self.modified = OffsetDateTime::now_utc();
        self
    }
}
