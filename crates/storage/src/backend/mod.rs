//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface over every namespace the gateway can store resources in (a local
//! directory, a remote WebDAV service, or an in-memory tree for tests). The
//! concrete variant is picked once, at construction time, from configuration.

mod local;
#[cfg(feature = "mock")]
mod mock;
mod webdav;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::webdav::{WebDavBackend, WebDavOptions};
use crate::ResourceMeta;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations. It's a glorified CRUD interface over a directory tree.
///
/// # Path Handling
/// All paths are relative to the backend root. Callers may pass leading or
/// trailing slashes; implementations normalize with
/// [`normalize_path`](crate::normalize_path) and reject anything escaping the
/// root.
///
/// # Examples
///
/// ```
/// use davcache_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_or_zero(backend: &dyn StorageBackend, path: &str) -> Result<u64> {
///     Ok(backend.stat(path).await?.map(|meta| meta.size).unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Create a directory and all of its missing ancestors.
    ///
    /// Idempotent: an existing directory is not an error.
    async fn ensure_directory(&self, path: &str) -> Result<()>;

    /// Store the contents of a local file at `path`.
    ///
    /// Parent directories are created as needed. The returned metadata
    /// carries a fingerprint computed locally over the uploaded bytes.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use davcache_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let meta = backend.upload("papers/report.pdf", Path::new("/tmp/upload.bin")).await?;
    /// println!("stored {} bytes ({:?})", meta.size, meta.fingerprint);
    /// # Ok(())
    /// # }
    /// ```
    async fn upload(&self, path: &str, source: &Path) -> Result<ResourceMeta>;

    /// Copy the resource at `path` into a local file.
    ///
    /// The destination's parent directory is created as needed. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if the resource does
    /// not exist and [`IsADirectory`](crate::error::ErrorKind::IsADirectory)
    /// if it is a collection.
    async fn download(&self, path: &str, destination: &Path) -> Result<()>;

    /// Delete a file, or a directory and everything below it.
    ///
    /// Deleting something that doesn't exist is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Move a resource within the same backend.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// does not exist.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed
    /// - If the destination already exists, it will be overwritten
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Get resource metadata without reading contents, `None` if absent.
    async fn stat(&self, path: &str) -> Result<Option<ResourceMeta>>;

    /// List the immediate children of a directory.
    ///
    /// The directory itself is not part of the result. A directory that
    /// doesn't exist lists as empty.
    ///
    /// ```no_run
    /// # use davcache_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// for child in backend.list_directory("papers").await? {
    ///     let kind = if child.is_dir { "dir" } else { "file" };
    ///     println!("{kind} {}", child.path);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn list_directory(&self, path: &str) -> Result<Vec<ResourceMeta>>;
}
