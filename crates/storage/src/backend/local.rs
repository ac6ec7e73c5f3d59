//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local filesystem.
//! Resources are stored in a configured directory and accessed using standard
//! filesystem operations via `tokio::fs` for async I/O. The resource manager
//! also uses it for its local mirror.

use crate::error::ErrorKind;
use crate::{ResourceMeta, StorageBackend, error::Result, fingerprint, path};
use async_trait::async_trait;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;

/// Local filesystem storage backend.
///
/// Stores resources in a directory on the local filesystem. All paths are
/// relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use davcache_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("mirror", "/var/lib/davcache/mirror")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, ""))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Root directory every relative path resolves against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Normalizes the path and joins it with the root directory (the empty
    /// path resolves to the root itself).
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = path::normalize(path)?;
        Ok(match normalized.is_empty() {
            true => self.root.clone(),
            false => self.root.join(normalized),
        })
    }

    fn map_io_error(e: std::io::Error, path: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Re-use same data collection from filesystem metadata for both list and
    /// stat functions.
    async fn describe(relative: String, absolute: &Path, metadata: Metadata) -> Result<ResourceMeta> {
        let modified = metadata.modified().map(OffsetDateTime::from).unwrap_or_else(|_| OffsetDateTime::now_utc());
        if metadata.is_dir() {
            return Ok(ResourceMeta::directory(relative, modified));
        }
        let digest = fingerprint::of_file(absolute).await?;
        Ok(ResourceMeta::file(relative, metadata.len(), modified).with_fingerprint(digest))
    }

    async fn create_parent(&self, absolute: &Path, path: &str) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let abs_path = self.resolve(path)?;
        fs::create_dir_all(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        tracing::debug!(backend = %self.name, path = %path, "Ensured directory exists");
        Ok(())
    }

    async fn upload(&self, path: &str, source: &Path) -> Result<ResourceMeta> {
        let relative = path::normalize(path)?;
        let abs_path = self.resolve(&relative)?;
        if fs::metadata(&abs_path).await.is_ok_and(|m| m.is_dir()) {
            exn::bail!(ErrorKind::IsADirectory(relative));
        }
        self.create_parent(&abs_path, &relative).await?;
        // Copying a file onto itself would truncate it.
        if fs::canonicalize(source).await.ok() != fs::canonicalize(&abs_path).await.ok() {
            fs::copy(source, &abs_path).await.map_err(|e| Self::map_io_error(e, &relative))?;
        }
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, &relative))?;
        let meta = Self::describe(relative, &abs_path, metadata).await?;
        tracing::debug!(backend = %self.name, path = %meta.path, bytes = meta.size, "Stored file");
        Ok(meta)
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<()> {
        let relative = path::normalize(path)?;
        let abs_path = self.resolve(&relative)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, &relative))?;
        if metadata.is_dir() {
            exn::bail!(ErrorKind::IsADirectory(relative));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        fs::copy(&abs_path, destination).await.map_err(|e| Self::map_io_error(e, &relative))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let relative = path::normalize(path)?;
        let abs_path = self.resolve(&relative)?;
        let result = match fs::symlink_metadata(&abs_path).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&abs_path).await,
            Ok(_) => fs::remove_file(&abs_path).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                tracing::debug!(backend = %self.name, path = %relative, "Deleted resource");
                Ok(())
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::map_io_error(err, &relative).into()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        let from_path = self.resolve(&from)?;
        let to_path = self.resolve(&to)?;
        if !fs::try_exists(&from_path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(from));
        }
        // Moves overwrite, and a directory can't be renamed onto a non-empty one.
        if from_path != to_path {
            self.delete(&to).await?;
        }
        self.create_parent(&to_path, &to).await?;
        fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, &from))?;
        tracing::debug!(backend = %self.name, from = %from, to = %to, "Moved resource");
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<ResourceMeta>> {
        let relative = path::normalize(path)?;
        let abs_path = self.resolve(&relative)?;
        match fs::metadata(&abs_path).await {
            Ok(metadata) => Ok(Some(Self::describe(relative, &abs_path, metadata).await?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::map_io_error(err, &relative).into()),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<ResourceMeta>> {
        let relative = path::normalize(path)?;
        let abs_path = self.resolve(&relative)?;
        // To stay consistent with remote backends, asking for the contents of
        // a directory that doesn't exist results in an empty list.
        let mut entries = match fs::read_dir(&abs_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(_) if abs_path.is_file() => return Ok(Vec::new()),
            Err(err) => return Err(Self::map_io_error(err, &relative).into()),
        };
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, &relative))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(backend = %self.name, entry = ?entry.path(), "Skipping non UTF-8 file name");
                continue;
            };
            let child_path = entry.path();
            // Follow symlinks; silently drop what is most likely a broken one.
            let Ok(metadata) = fs::metadata(&child_path).await else {
                continue;
            };
            children.push(Self::describe(path::join(&relative, &name), &child_path, metadata).await?);
        }
        tracing::debug!(backend = %self.name, path = %relative, entries = children.len(), "Listed directory");
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::of_bytes;

    async fn source_file(dir: &Path, data: &[u8]) -> PathBuf {
        let source = dir.join("upload.tmp");
        fs::write(&source, data).await.unwrap();
        source
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("name", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("name", "relative/path").is_err());
        assert!(LocalBackend::new("name", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_missing_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/root");
        LocalBackend::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_resolve() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        assert_eq!(backend.resolve("/a/b.txt").unwrap(), temp_dir.path().join("a/b.txt"));
        assert_eq!(backend.resolve("").unwrap(), temp_dir.path());
        // Path traversal is prevented
        assert!(backend.resolve("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let source = source_file(staging.path(), b"Hello, world!").await;
        let meta = backend.upload("docs/hello.txt", &source).await.unwrap();
        assert_eq!(meta.path, "docs/hello.txt");
        assert_eq!(meta.size, 13);
        assert_eq!(meta.fingerprint, Some(of_bytes(b"Hello, world!")));
        let target = staging.path().join("out/hello.txt");
        backend.download("docs/hello.txt", &target).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"Hello, world!");
    }

    #[tokio::test]
    async fn test_upload_onto_directory_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.ensure_directory("a").await.unwrap();
        let source = source_file(staging.path(), b"data").await;
        let err = backend.upload("a", &source).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::IsADirectory(_)));
    }

    #[tokio::test]
    async fn test_upload_in_place_keeps_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let existing = temp_dir.path().join("same.txt");
        fs::write(&existing, b"keep me").await.unwrap();
        let meta = backend.upload("same.txt", &existing).await.unwrap();
        assert_eq!(meta.size, 7);
        assert_eq!(fs::read(&existing).await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_download_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.ensure_directory("dir").await.unwrap();
        let target = temp_dir.path().join("never");
        let err = backend.download("missing.txt", &target).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(p) if p == "missing.txt"));
        let err = backend.download("dir", &target).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::IsADirectory(_)));
    }

    #[tokio::test]
    async fn test_ensure_directory_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        backend.ensure_directory("a/b/c").await.unwrap();
        backend.ensure_directory("a/b/c").await.unwrap();
        assert!(temp_dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let source = source_file(staging.path(), b"data").await;
        backend.upload("a/b/file.txt", &source).await.unwrap();
        backend.delete("a/b/file.txt").await.unwrap();
        assert!(backend.stat("a/b/file.txt").await.unwrap().is_none());
        // Directories are removed recursively
        backend.upload("a/b/other.txt", &source).await.unwrap();
        backend.delete("a").await.unwrap();
        assert!(!temp_dir.path().join("a").exists());
        // Deleting nonexistent resources is fine
        backend.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let source = source_file(staging.path(), b"data").await;
        backend.upload("old.txt", &source).await.unwrap();
        backend.rename("old.txt", "a/b/new.txt").await.unwrap();
        assert!(backend.stat("old.txt").await.unwrap().is_none());
        assert_eq!(backend.stat("a/b/new.txt").await.unwrap().unwrap().size, 4);
        let err = backend.rename("old.txt", "again.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rename_replaces_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let source = source_file(staging.path(), b"data").await;
        backend.upload("new/kept.txt", &source).await.unwrap();
        backend.upload("old/stale.txt", &source).await.unwrap();
        backend.rename("new", "old").await.unwrap();
        assert!(backend.stat("old/kept.txt").await.unwrap().is_some());
        assert!(backend.stat("old/stale.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        assert!(backend.stat("nope").await.unwrap().is_none());
        let source = source_file(staging.path(), b"12345").await;
        backend.upload("dir/file.txt", &source).await.unwrap();
        let dir = backend.stat("dir/").await.unwrap().unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.path, "dir");
        assert_eq!(dir.size, 0);
        assert!(dir.fingerprint.is_none());
        let file = backend.stat("/dir/file.txt").await.unwrap().unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 5);
        assert_eq!(file.fingerprint, Some(of_bytes(b"12345")));
        let root = backend.stat("").await.unwrap().unwrap();
        assert!(root.is_dir);
        assert_eq!(root.path, "");
    }

    #[tokio::test]
    async fn test_list_directory_immediate_children_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        let source = source_file(staging.path(), b"data").await;
        backend.upload("a/one.txt", &source).await.unwrap();
        backend.upload("a/b/two.txt", &source).await.unwrap();
        let mut children = backend.list_directory("a").await.unwrap();
        children.sort_by(|x, y| x.path.cmp(&y.path));
        let paths: Vec<_> = children.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b", "a/one.txt"]);
        assert!(children[0].is_dir);
        let root: Vec<_> = backend.list_directory("").await.unwrap().into_iter().map(|c| c.path).collect();
        assert_eq!(root, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        assert!(backend.list_directory("nonexistent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("name", temp_dir.path()).unwrap();
        // Attempts to escape the root should fail
        assert!(backend.stat("../etc/passwd").await.is_err());
        assert!(backend.ensure_directory("etc/../../escape").await.is_err());
        assert!(backend.delete("../../file").await.is_err());
    }
}
