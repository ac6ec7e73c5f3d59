pub mod backend;
pub mod date;
pub mod error;
pub mod file;
pub mod fingerprint;
pub mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::ResourceMeta;
pub use crate::path::normalize as normalize_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
