//! SQLite path index for resource metadata.
//!
//! The index is the fastest of the three stores the resource manager
//! consults, and the only one that can answer listings without touching the
//! network. It is not the source of truth: rows are folded in whenever the
//! mirror or the backend is observed, and a deleted database is rebuilt
//! lazily by subsequent reads.
//!
//! # Architecture
//! A single `entries` table, keyed by normalized path, with the derived
//! parent path stored alongside so depth-1 listings are an index lookup.
//! Hierarchy is purely a string property of the path.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::repo::{PathIndex, RetentionPolicy};

/// One index row; the same shape storage backends report.
pub type PathEntry = davcache_storage::ResourceMeta;
