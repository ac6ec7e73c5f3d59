//! Configuration loading and validation.
//!
//! Sources are layered with `figment`, later ones overriding earlier ones:
//!
//! 1. built-in defaults (platform data directory from `directories`),
//! 2. a TOML file (`davcache.toml` in the working directory, or an explicit
//!    path which then must exist),
//! 3. environment variables prefixed with `DAVCACHE_`, nested keys separated
//!    by `__` (e.g. `DAVCACHE_BACKEND__BASE_URL`).
//!
//! ```toml
//! mirror_dir = "/var/lib/davcache/mirror"
//! index_path = "/var/lib/davcache/index.sqlite"
//!
//! [backend]
//! type = "webdav"
//! base_url = "https://cloud.example.com/remote.php/dav/files/alice"
//! username = "alice"
//! timeout_secs = 20
//!
//! [retention]
//! max_entries = 100000
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_FILE: &str = "davcache.toml";
pub const ENV_PREFIX: &str = "DAVCACHE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local directory holding full copies of cached files.
    pub mirror_dir: PathBuf,
    /// SQLite database file of the path index.
    pub index_path: PathBuf,
    /// The mirror is the backend's own directory: remote writes are skipped.
    #[serde(default)]
    pub mirror_is_authoritative: bool,
    pub backend: BackendConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local {
        root: PathBuf,
    },
    #[serde(rename = "webdav")]
    WebDav {
        base_url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_verify_tls")]
        verify_tls: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub max_age_secs: Option<u64>,
    pub max_entries: Option<u64>,
}
impl RetentionConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_verify_tls() -> bool {
    true
}

/// Platform data directory, falling back to a hidden working-directory folder.
fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "davcache")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".davcache"))
}

impl Default for Config {
    fn default() -> Self {
        let data = data_dir();
        Self {
            mirror_dir: data.join("mirror"),
            index_path: data.join("index.sqlite"),
            mirror_is_authoritative: false,
            backend: BackendConfig::Local { root: data.join("backend") },
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Layered sources without extracting them.
    ///
    /// With `file` set, that file replaces [`DEFAULT_FILE`].
    pub fn figment(file: Option<&Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file.unwrap_or(Path::new(DEFAULT_FILE))))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load, resolve relative paths against the working directory, and validate.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        if let Some(file) = file
            && !file.is_file()
        {
            exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", file.display())));
        }
        let config = Self::from_figment(Self::figment(file))?;
        let base = std::env::current_dir().or_raise(|| ErrorKind::Io)?;
        let config = config.resolved_against(&base);
        config.validate()?;
        tracing::debug!(
            mirror_dir = %config.mirror_dir.display(),
            index_path = %config.index_path.display(),
            backend = config.backend.kind(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Extract a configuration from an arbitrary figment (no path resolution).
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment.extract::<Self>().or_raise(|| ErrorKind::Load)
    }

    /// Make every relative path absolute against `base`.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.mirror_dir);
        resolve(&mut self.index_path);
        if let BackendConfig::Local { root } = &mut self.backend {
            resolve(root);
        }
        self
    }

    /// Semantic checks that deserialization can't express.
    pub fn validate(&self) -> Result<()> {
        if self.mirror_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("mirror_dir must not be empty".to_string()));
        }
        if self.index_path.as_os_str().is_empty() || self.index_path.is_dir() {
            exn::bail!(ErrorKind::Invalid("index_path must name a file".to_string()));
        }
        match &self.backend {
            BackendConfig::Local { root } => {
                if root.as_os_str().is_empty() {
                    exn::bail!(ErrorKind::Invalid("local backend root must not be empty".to_string()));
                }
                if *root == self.mirror_dir && !self.mirror_is_authoritative {
                    exn::bail!(ErrorKind::Invalid(
                        "local backend root is the mirror directory; set mirror_is_authoritative".to_string()
                    ));
                }
                if *root != self.mirror_dir && self.mirror_is_authoritative {
                    exn::bail!(ErrorKind::Invalid(
                        "mirror_is_authoritative requires the local backend root to be mirror_dir".to_string()
                    ));
                }
            },
            BackendConfig::WebDav { base_url, timeout_secs, .. } => {
                if base_url.trim().is_empty() {
                    exn::bail!(ErrorKind::Invalid("webdav base_url must not be empty".to_string()));
                }
                if *timeout_secs == 0 {
                    exn::bail!(ErrorKind::Invalid("webdav timeout_secs must be positive".to_string()));
                }
                if self.mirror_is_authoritative {
                    exn::bail!(ErrorKind::Invalid(
                        "mirror_is_authoritative requires a local backend".to_string()
                    ));
                }
            },
        }
        Ok(())
    }

    /// Create the mirror directory and the index file's parent.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.mirror_dir).or_raise(|| ErrorKind::Io)?;
        if let Some(parent) = self.index_path.parent() {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        Ok(())
    }
}

impl BackendConfig {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::WebDav { .. } => "webdav",
        }
    }
}
