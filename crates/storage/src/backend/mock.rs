//! In-memory storage backend for testing.

use crate::error::{ErrorKind, Result};
use crate::{ResourceMeta, StorageBackend, fingerprint, path};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
enum Node {
    Directory(OffsetDateTime),
    File(OffsetDateTime, Vec<u8>),
}

/// In-memory storage backend for testing.
///
/// Resources are stored in a `BTreeMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Every
/// trait call is counted per operation name, which lets tests assert how
/// often a caller fell through to the backend.
///
/// # Examples
///
/// ```
/// use davcache_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("papers/2024/report.pdf", b"%PDF-1.7")]);
/// assert!(backend.stat("papers/2024").await?.unwrap().is_dir);
/// assert_eq!(backend.calls("stat"), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<String, Node>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files (ancestor directories
    /// are created implicitly).
    ///
    /// Panics if any path fails normalization (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(normalized) = path::normalize(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {path}");
            };
            Self::insert_ancestors(&mut map, path::parent(&normalized).unwrap_or(""), now);
            map.insert(normalized, Node::File(now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of times the named trait method (e.g. `"stat"`) was called.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().map(|calls| calls.get(operation).copied().unwrap_or(0)).unwrap_or(0)
    }

    /// Number of trait method calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.values().sum()).unwrap_or(0)
    }

    /// Raw contents of a stored file, bypassing call counting.
    pub async fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.storage.read().await.get(path) {
            Some(Node::File(_, data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn record(&self, operation: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_default() += 1;
        }
    }

    fn insert_ancestors(map: &mut BTreeMap<String, Node>, path: &str, now: OffsetDateTime) {
        for ancestor in path::ancestors(path) {
            map.entry(ancestor.to_string()).or_insert(Node::Directory(now));
        }
    }

    fn describe(path: &str, node: &Node) -> ResourceMeta {
        match node {
            Node::Directory(modified) => ResourceMeta::directory(path, *modified),
            Node::File(modified, data) => ResourceMeta::file(path, data.len() as u64, *modified)
                .with_fingerprint(fingerprint::of_bytes(data)),
        }
    }

    /// Keys of `path` and every descendant.
    fn subtree_keys(map: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
        map.keys().filter(|key| key.as_str() == path || path::strip_ancestor(path, key).is_some()).cloned().collect()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_directory(&self, path: &str) -> Result<()> {
        self.record("ensure_directory");
        let path = path::normalize(path)?;
        let mut guard = self.storage.write().await;
        if let Some(Node::File(..)) = guard.get(&path) {
            exn::bail!(ErrorKind::Transport(format!("conflict: /{path} is a file")));
        }
        Self::insert_ancestors(&mut guard, &path, OffsetDateTime::now_utc());
        Ok(())
    }

    async fn upload(&self, path: &str, source: &Path) -> Result<ResourceMeta> {
        self.record("upload");
        let path = path::normalize(path)?;
        let data = tokio::fs::read(source).await.map_err(ErrorKind::Io)?;
        let mut guard = self.storage.write().await;
        if let Some(Node::Directory(_)) = guard.get(&path) {
            exn::bail!(ErrorKind::IsADirectory(path));
        }
        let now = OffsetDateTime::now_utc();
        Self::insert_ancestors(&mut guard, path::parent(&path).unwrap_or(""), now);
        let node = Node::File(now, data);
        let meta = Self::describe(&path, &node);
        guard.insert(path, node);
        Ok(meta)
    }

    async fn download(&self, path: &str, destination: &Path) -> Result<()> {
        self.record("download");
        let path = path::normalize(path)?;
        let data = match self.storage.read().await.get(&path) {
            Some(Node::File(_, data)) => data.clone(),
            Some(Node::Directory(_)) => exn::bail!(ErrorKind::IsADirectory(path)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        };
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        tokio::fs::write(destination, data).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.record("delete");
        let path = path::normalize(path)?;
        let mut guard = self.storage.write().await;
        for key in Self::subtree_keys(&guard, &path) {
            guard.remove(&key);
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.record("rename");
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        let mut guard = self.storage.write().await;
        if !guard.contains_key(&from) {
            exn::bail!(ErrorKind::NotFound(from));
        }
        if from == to {
            return Ok(());
        }
        for key in Self::subtree_keys(&guard, &to) {
            guard.remove(&key);
        }
        let moved: Vec<(String, Node)> = Self::subtree_keys(&guard, &from)
            .into_iter()
            .filter_map(|key| guard.remove(&key).map(|node| (key, node)))
            .collect();
        Self::insert_ancestors(&mut guard, path::parent(&to).unwrap_or(""), OffsetDateTime::now_utc());
        for (key, node) in moved {
            let suffix = path::strip_ancestor(&from, &key).unwrap_or("");
            guard.insert(path::join(&to, suffix), node);
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<Option<ResourceMeta>> {
        self.record("stat");
        let path = path::normalize(path)?;
        if path.is_empty() {
            return Ok(Some(ResourceMeta::directory(path, OffsetDateTime::UNIX_EPOCH)));
        }
        Ok(self.storage.read().await.get(&path).map(|node| Self::describe(&path, node)))
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<ResourceMeta>> {
        self.record("list_directory");
        let path = path::normalize(path)?;
        let guard = self.storage.read().await;
        Ok(guard
            .iter()
            .filter(|(key, _)| path::strip_ancestor(&path, key).is_some_and(|rest| !rest.contains('/')))
            .map(|(key, node)| Self::describe(key, node))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn staged_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let source = dir.join(name);
        tokio::fs::write(&source, data).await.unwrap();
        source
    }

    #[tokio::test]
    async fn test_with_files_creates_ancestors() {
        let backend = MockBackend::with_files([("a/b/file.txt", Vec::from(*b"data"))]);
        assert!(backend.stat("a").await.unwrap().unwrap().is_dir);
        assert!(backend.stat("a/b").await.unwrap().unwrap().is_dir);
        assert_eq!(backend.stat("a/b/file.txt").await.unwrap().unwrap().size, 4);
        assert_eq!(backend.calls("stat"), 3);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let staging = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let source = staged_file(staging.path(), "src", b"hello").await;
        let meta = backend.upload("x/y.txt", &source).await.unwrap();
        assert_eq!(meta.fingerprint, Some(fingerprint::of_bytes(b"hello")));
        let target = staging.path().join("out/y.txt");
        backend.download("x/y.txt", &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"hello");
        assert_eq!(backend.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let staging = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let err = backend.download("missing.txt", &staging.path().join("x")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_recursive_and_tolerant() {
        let backend = MockBackend::with_files([("a/b/one", Vec::from(*b"1")), ("a/two", Vec::from(*b"2"))]);
        backend.delete("a").await.unwrap();
        assert!(backend.stat("a/b/one").await.unwrap().is_none());
        assert!(backend.stat("a").await.unwrap().is_none());
        backend.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let backend = MockBackend::with_files([("a/b/one", Vec::from(*b"1"))]);
        backend.rename("a", "z/a").await.unwrap();
        assert!(backend.stat("a").await.unwrap().is_none());
        assert!(backend.stat("z").await.unwrap().unwrap().is_dir);
        assert_eq!(backend.contents("z/a/b/one").await, Some(b"1".to_vec()));
        let err = backend.rename("a", "b").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_directory() {
        let backend =
            MockBackend::with_files([("a/one", Vec::from(*b"1")), ("a/b/two", Vec::from(*b"2")), ("ab", Vec::from(*b"3"))]);
        let mut paths: Vec<_> = backend.list_directory("a").await.unwrap().into_iter().map(|m| m.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["a/b", "a/one"]);
        let mut root: Vec<_> = backend.list_directory("").await.unwrap().into_iter().map(|m| m.path).collect();
        root.sort();
        assert_eq!(root, vec!["a", "ab"]);
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
