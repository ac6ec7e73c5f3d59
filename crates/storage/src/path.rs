//! Path normalization and hierarchy helpers.
//!
//! Every store in this workspace (index, mirror, backends) is addressed by the
//! same normalized relative path: segments joined with `/`, no leading or
//! trailing slash, and the empty string for the root. The hierarchy is purely
//! a string property; a path's parent is everything before its last `/`.

use crate::error::{ErrorKind, Result};

/// Normalizes a caller-supplied path, making sure it can't escape the root.
///
/// Leading/trailing slashes, repeated slashes and `.` segments are dropped,
/// `..` pops the previous segment. Unlike a filesystem path, the empty result
/// is valid: it addresses the root.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if the path contains a null byte or climbs above the root.
///
/// # Examples
///
/// ```
/// use davcache_storage::normalize_path;
/// assert_eq!(normalize_path("/a/b/").unwrap(), "a/b");
/// assert_eq!(normalize_path("a//./b/../c").unwrap(), "a/c");
/// assert_eq!(normalize_path("/").unwrap(), "");
/// assert!(normalize_path("../etc/passwd").is_err());
/// assert!(normalize_path("a\0b").is_err());
/// ```
pub fn normalize(path: impl AsRef<str>) -> Result<String> {
    let raw = path.as_ref();
    // Null bytes cause truncation in C-based syscalls further down the line.
    if raw.contains('\0') {
        exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if segments.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(raw.to_string()));
                }
            },
            normal => segments.push(normal),
        }
    }
    Ok(segments.join("/"))
}

/// Parent of a normalized path, or `None` for the root itself.
///
/// ```
/// use davcache_storage::path::parent;
/// assert_eq!(parent("a/b/c.txt"), Some("a/b"));
/// assert_eq!(parent("a"), Some(""));
/// assert_eq!(parent(""), None);
/// ```
pub fn parent(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(""))
}

/// Last segment of a normalized path (empty for the root).
pub fn name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Joins a normalized base with a normalized child.
pub fn join(base: &str, child: &str) -> String {
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{child}"),
    }
}

/// Returns `path` relative to `prefix` if it is a strict descendant of it.
///
/// ```
/// use davcache_storage::path::strip_ancestor;
/// assert_eq!(strip_ancestor("a", "a/b/c"), Some("b/c"));
/// assert_eq!(strip_ancestor("", "a"), Some("a"));
/// assert_eq!(strip_ancestor("a", "a"), None);
/// assert_eq!(strip_ancestor("a", "ab/c"), None);
/// ```
pub fn strip_ancestor<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return (!path.is_empty()).then_some(path);
    }
    path.strip_prefix(prefix)?.strip_prefix('/').filter(|rest| !rest.is_empty())
}

/// Ancestors of a normalized path, outermost first, including the path itself
/// but excluding the root.
///
/// ```
/// use davcache_storage::path::ancestors;
/// assert_eq!(ancestors("a/b/c"), vec!["a", "a/b", "a/b/c"]);
/// assert!(ancestors("").is_empty());
/// ```
pub fn ancestors(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    path.match_indices('/').map(|(idx, _)| &path[..idx]).chain(std::iter::once(path)).collect()
}
