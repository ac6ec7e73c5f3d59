//! Consistency layer of the gateway: keeps the path index, the local mirror
//! and a storage backend in agreement, and renders listing responses.

pub mod error;
pub mod framer;
mod depth;
mod manager;

pub use crate::depth::Depth;
pub use crate::manager::{ResourceManager, retention_policy};
