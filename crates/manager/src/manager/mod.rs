//! The consistency layer between the path index, the local mirror and the
//! storage backend.
//!
//! Reads consult the stores in priority order (index, mirror, backend) and
//! fold whatever the slower tiers report back into the index. Index hits are
//! trusted as-is; use [`ResourceManager::refresh`] to revalidate a subtree.

mod mutate;

use crate::Depth;
use crate::error::{ErrorKind, Result, StorageResultExt};
use davcache_config::{BackendConfig, Config};
use davcache_index::{Database, PathEntry, PathIndex, RetentionPolicy};
use davcache_storage::backend::{LocalBackend, WebDavBackend, WebDavOptions};
use davcache_storage::{BackendHandle, ResourceMeta, StorageBackend, path};
use exn::{OptionExt, ResultExt};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Name the mirror is registered under in logs.
const MIRROR_NAME: &str = "mirror";

/// Retention bound described by the configuration.
pub fn retention_policy(config: &Config) -> RetentionPolicy {
    RetentionPolicy {
        max_age: config.retention.max_age(),
        max_entries: config.retention.max_entries,
    }
}

/// Orchestrates the path index, the local mirror and a storage backend.
///
/// Operations are independent: nothing is locked across calls, and the
/// multi-store updates of writes are not transactional. A failure part way
/// through leaves the steps already applied in place.
pub struct ResourceManager {
    index: PathIndex,
    mirror: LocalBackend,
    backend: BackendHandle,
    /// The mirror *is* the backend's namespace; backend writes are skipped.
    mirror_is_authoritative: bool,
}

impl ResourceManager {
    pub fn new(index: PathIndex, mirror: LocalBackend, backend: BackendHandle, mirror_is_authoritative: bool) -> Self {
        Self {
            index,
            mirror,
            backend,
            mirror_is_authoritative,
        }
    }

    /// Build every collaborator from configuration.
    ///
    /// Creates the mirror directory and the index database if needed, and
    /// picks the backend variant named by `config.backend`.
    #[instrument(skip_all, fields(backend = config.backend.kind()))]
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        config.ensure_directories().or_raise(|| ErrorKind::Config)?;
        let database = Database::connect(&config.index_path).await.or_raise(|| ErrorKind::Index)?;
        let mirror = LocalBackend::new(MIRROR_NAME, &config.mirror_dir).or_storage()?;
        let backend: BackendHandle = match &config.backend {
            BackendConfig::Local { root } => Arc::new(LocalBackend::new("local", root).or_storage()?),
            BackendConfig::WebDav {
                base_url,
                username,
                password,
                timeout_secs,
                verify_tls,
            } => {
                let options = WebDavOptions {
                    username: username.clone(),
                    password: password.clone(),
                    timeout: Duration::from_secs(*timeout_secs),
                    verify_tls: *verify_tls,
                };
                Arc::new(WebDavBackend::new("webdav", base_url, options).or_storage()?)
            },
        };
        tracing::info!(
            mirror = %config.mirror_dir.display(),
            backend = backend.name(),
            mirror_is_authoritative = config.mirror_is_authoritative,
            "resource manager ready"
        );
        Ok(Self::new(PathIndex::from(&database), mirror, backend, config.mirror_is_authoritative))
    }

    /// The path index, for callers that need direct access (maintenance, tests).
    pub fn index(&self) -> &PathIndex {
        &self.index
    }

    pub fn mirror(&self) -> &LocalBackend {
        &self.mirror
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn mirror_is_authoritative(&self) -> bool {
        self.mirror_is_authoritative
    }

    fn normalize(raw: &str) -> Result<String> {
        path::normalize(raw).or_storage()
    }

    async fn record(&self, entry: &PathEntry) -> Result<()> {
        self.index.upsert(entry).await.or_raise(|| ErrorKind::Index)?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Metadata for `path`, or `None` if no store knows about it.
    ///
    /// An index hit is returned without looking at the mirror or backend.
    /// On a miss the mirror is checked, then the backend; the first store that
    /// knows the path has its answer recorded in the index.
    #[instrument(skip(self))]
    pub async fn stat(&self, path: &str) -> Result<Option<ResourceMeta>> {
        let path = Self::normalize(path)?;
        if let Some(entry) = self.index.get(&path).await.or_raise(|| ErrorKind::Index)? {
            return Ok(Some(entry));
        }
        if let Some(meta) = self.mirror.stat(&path).await.or_storage()? {
            tracing::debug!(path = %path, "index miss, found in mirror");
            self.record(&meta).await?;
            return Ok(Some(meta));
        }
        if self.mirror_is_authoritative {
            return Ok(None);
        }
        match self.backend.stat(&path).await.or_storage()? {
            Some(meta) => {
                tracing::debug!(path = %path, backend = self.backend.name(), "index miss, found in backend");
                self.record(&meta).await?;
                Ok(Some(meta))
            },
            None => Ok(None),
        }
    }

    /// Location of the mirror copy of a file, downloading it first if needed.
    #[instrument(skip(self))]
    pub async fn get_file(&self, path: &str) -> Result<PathBuf> {
        let path = Self::normalize(path)?;
        let local = self.mirror.resolve(&path).or_storage()?;
        match tokio::fs::metadata(&local).await {
            Ok(metadata) if metadata.is_dir() => exn::bail!(ErrorKind::IsADirectory(path)),
            Ok(_) => return Ok(local),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io),
        }
        if self.mirror_is_authoritative {
            exn::bail!(ErrorKind::NotFound(path));
        }
        self.backend.download(&path, &local).await.or_storage()?;
        let meta = self.mirror.stat(&path).await.or_storage()?.ok_or_raise(|| ErrorKind::NotFound(path.clone()))?;
        tracing::debug!(path = %path, bytes = meta.size, "downloaded into mirror");
        self.record(&meta).await?;
        Ok(local)
    }

    /// Entries below `path` within `depth` (the resource itself excluded).
    ///
    /// Non-empty index results are trusted. An empty one falls back to the
    /// backend (the mirror, when authoritative): one listing for
    /// [`Depth::One`], a breadth-first walk for [`Depth::Infinity`], recording
    /// every discovered entry.
    #[instrument(skip(self))]
    pub async fn list_directory(&self, path: &str, depth: Depth) -> Result<Vec<ResourceMeta>> {
        let path = Self::normalize(path)?;
        match depth {
            Depth::Zero => Ok(Vec::new()),
            Depth::One => {
                let children = self.index.list_children(&path).await.or_raise(|| ErrorKind::Index)?;
                if !children.is_empty() {
                    return Ok(children);
                }
                let children = self.listing_source().list_directory(&path).await.or_storage()?;
                for child in &children {
                    self.record(child).await?;
                }
                Ok(children)
            },
            Depth::Infinity => {
                let subtree = self.index.list_subtree(&path).await.or_raise(|| ErrorKind::Index)?;
                if !subtree.is_empty() {
                    return Ok(subtree);
                }
                self.walk_fallback(&path).await
            },
        }
    }

    /// Store that listings fall back to on an index miss: the mirror when it is
    /// authoritative, so listings never show what `stat` can't find.
    fn listing_source(&self) -> &(dyn StorageBackend + Send + Sync) {
        match self.mirror_is_authoritative {
            true => &self.mirror,
            false => self.backend.as_ref(),
        }
    }

    /// Breadth-first listing of the fallback store below `root`.
    async fn walk_fallback(&self, root: &str) -> Result<Vec<ResourceMeta>> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(directory) = queue.pop_front() {
            for child in self.listing_source().list_directory(&directory).await.or_storage()? {
                self.record(&child).await?;
                if child.is_dir {
                    queue.push_back(child.path.clone());
                }
                found.push(child);
            }
        }
        tracing::debug!(path = %root, entries = found.len(), "walked subtree");
        Ok(found)
    }

    /// The resource itself followed by its listing, as a `PROPFIND` needs.
    ///
    /// The root is synthesized as a directory when no store has recorded it.
    #[instrument(skip(self))]
    pub async fn propfind(&self, path: &str, depth: Depth) -> Result<Vec<ResourceMeta>> {
        let path = Self::normalize(path)?;
        let resource = match self.stat(&path).await? {
            Some(resource) => resource,
            None if path.is_empty() => ResourceMeta::directory("", OffsetDateTime::now_utc()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        };
        if !resource.is_dir {
            return Ok(vec![resource]);
        }
        let mut entries = vec![resource];
        entries.extend(self.list_directory(&path, depth).await?);
        Ok(entries)
    }

    // =========================================================================
    // Index maintenance
    // =========================================================================

    /// Forget what the index knows about `path` and everything below it,
    /// then look it up again.
    ///
    /// This is the only way changes made directly in the backend become
    /// visible for paths the index already knows.
    #[instrument(skip(self))]
    pub async fn refresh(&self, path: &str) -> Result<Option<ResourceMeta>> {
        let path = Self::normalize(path)?;
        self.index.delete(&path).await.or_raise(|| ErrorKind::Index)?;
        let dropped = self.index.delete_subtree(&path).await.or_raise(|| ErrorKind::Index)?;
        tracing::debug!(path = %path, dropped, "dropped index entries");
        self.stat(&path).await
    }

    /// Apply a retention bound to the index. Never called implicitly.
    #[instrument(skip(self))]
    pub async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        let removed = self.index.prune(policy).await.or_raise(|| ErrorKind::Index)?;
        tracing::info!(removed, "pruned path index");
        Ok(removed)
    }
}
