//! Write operations.
//!
//! Each one applies its steps in a fixed order (backend and mirror first,
//! index last) and stops at the first failure without undoing earlier steps.

use super::ResourceManager;
use crate::error::{ErrorKind, Result, StorageResultExt};
use davcache_index::PathEntry;
use davcache_storage::{ResourceMeta, StorageBackend, path};
use exn::ResultExt;
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;

impl ResourceManager {
    /// Record directory rows for any ancestors of `path` the index lacks, so
    /// index listings of a parent include freshly written children.
    async fn record_ancestors(&self, path: &str) -> Result<()> {
        let Some(parent) = path::parent(path) else {
            return Ok(());
        };
        for ancestor in path::ancestors(parent) {
            if self.index.get(ancestor).await.or_raise(|| ErrorKind::Index)?.is_none() {
                self.record(&PathEntry::directory(ancestor, OffsetDateTime::now_utc())).await?;
            }
        }
        Ok(())
    }

    /// Create a directory (and its ancestors) everywhere. Idempotent.
    #[instrument(skip(self))]
    pub async fn ensure_directory(&self, path: &str) -> Result<ResourceMeta> {
        let path = Self::normalize(path)?;
        if !self.mirror_is_authoritative {
            self.backend.ensure_directory(&path).await.or_storage()?;
        }
        self.mirror.ensure_directory(&path).await.or_storage()?;
        let entry = PathEntry::directory(path.as_str(), OffsetDateTime::now_utc());
        self.record_ancestors(&path).await?;
        self.record(&entry).await?;
        Ok(entry)
    }

    /// Store the contents of `source` at `path`.
    ///
    /// The bytes land in the mirror first; the backend receives the mirror
    /// copy unless the mirror is authoritative. The fingerprint is computed
    /// from the mirror copy.
    #[instrument(skip(self, source), fields(source = %source.display()))]
    pub async fn put_file(&self, path: &str, source: &Path) -> Result<ResourceMeta> {
        let path = Self::normalize(path)?;
        if path.is_empty() {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        if let Some(existing) = self.index.get(&path).await.or_raise(|| ErrorKind::Index)?
            && existing.is_dir
        {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        let meta = self.mirror.upload(&path, source).await.or_storage()?.touched();
        if !self.mirror_is_authoritative {
            let local = self.mirror.resolve(&path).or_storage()?;
            self.backend.upload(&path, &local).await.or_storage()?;
        }
        self.record_ancestors(&path).await?;
        self.record(&meta).await?;
        tracing::info!(path = %path, bytes = meta.size, "stored file");
        Ok(meta)
    }

    /// Remove `path` (recursively for directories) from every store.
    ///
    /// Absence in any store is not an error, so deleting twice is fine.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize(path)?;
        if path.is_empty() {
            exn::bail!(ErrorKind::InvalidPath("refusing to delete the root".to_string()));
        }
        self.mirror.delete(&path).await.or_storage()?;
        if !self.mirror_is_authoritative {
            self.backend.delete(&path).await.or_storage()?;
        }
        self.index.delete(&path).await.or_raise(|| ErrorKind::Index)?;
        let descendants = self.index.delete_subtree(&path).await.or_raise(|| ErrorKind::Index)?;
        tracing::info!(path = %path, descendants, "deleted resource");
        Ok(())
    }

    /// Move `source` to `destination`, overwriting it.
    ///
    /// In the index the source row (and every descendant row) is removed and
    /// re-inserted under the destination with a refreshed timestamp. Sources
    /// the index never recorded don't gain a destination row here; the next
    /// read discovers it.
    #[instrument(skip(self))]
    pub async fn rename(&self, source: &str, destination: &str) -> Result<()> {
        let source = Self::normalize(source)?;
        let destination = Self::normalize(destination)?;
        if source.is_empty() || destination.is_empty() {
            exn::bail!(ErrorKind::InvalidPath("the root can't be moved or replaced".to_string()));
        }
        if source == destination {
            return Ok(());
        }
        if path::strip_ancestor(&source, &destination).is_some() {
            exn::bail!(ErrorKind::InvalidPath(format!("can't move /{source} into itself")));
        }

        let in_mirror = self.mirror.stat(&source).await.or_storage()?.is_some();
        if in_mirror {
            self.mirror.rename(&source, &destination).await.or_storage()?;
        } else if self.mirror_is_authoritative {
            exn::bail!(ErrorKind::NotFound(source));
        } else {
            // The destination's old mirror copy would shadow the moved data.
            self.mirror.delete(&destination).await.or_storage()?;
        }
        if !self.mirror_is_authoritative {
            self.backend.rename(&source, &destination).await.or_storage()?;
        }

        let descendants = self.index.list_subtree(&source).await.or_raise(|| ErrorKind::Index)?;
        let prior = self.index.delete(&source).await.or_raise(|| ErrorKind::Index)?;
        self.index.delete_subtree(&source).await.or_raise(|| ErrorKind::Index)?;
        self.index.delete_subtree(&destination).await.or_raise(|| ErrorKind::Index)?;
        if let Some(prior) = prior {
            self.record_ancestors(&destination).await?;
            self.record(&prior.relocated(destination.as_str())).await?;
        } else {
            // Without a source row, a stale destination row would survive.
            self.index.delete(&destination).await.or_raise(|| ErrorKind::Index)?;
        }
        for entry in &descendants {
            let suffix = path::strip_ancestor(&source, &entry.path).unwrap_or_default();
            self.record(&entry.relocated(path::join(&destination, suffix))).await?;
        }
        tracing::info!(from = %source, to = %destination, descendants = descendants.len(), "moved resource");
        Ok(())
    }
}
