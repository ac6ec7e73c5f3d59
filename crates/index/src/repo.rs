//! Path index repository.
//!
//! Every input path is normalized here before it reaches SQL, so callers can
//! pass paths with leading or trailing slashes. Sequences are returned in no
//! particular order.

use crate::error::{ErrorKind, Result};
use crate::models::{EntryRow, format_timestamp};
use crate::{Database, PathEntry};
use davcache_storage::path;
use exn::ResultExt;
use sqlx::SqlitePool;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Upper bound on the index, applied only by [`PathIndex::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rows last updated longer ago than this are removed.
    pub max_age: Option<Duration>,
    /// After the age cut, the oldest rows beyond this count are removed.
    pub max_entries: Option<u64>,
}
impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_age.is_none() && self.max_entries.is_none()
    }
}

/// Durable map from normalized path to [`PathEntry`].
///
/// Writes are last-writer-wins with no version check. `upsert` and `delete`
/// hand back the row they replaced, read in the same transaction.
#[derive(Debug, Clone)]
pub struct PathIndex {
    pool: SqlitePool,
}
impl From<&Database> for PathIndex {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl PathIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn normalize(raw: &str) -> Result<String> {
        path::normalize(raw).or_raise(|| ErrorKind::InvalidPath(raw.to_string()))
    }

    /// Key range `[lower, upper)` holding every strict descendant of `prefix`.
    ///
    /// `/` sorts immediately before `0`, so `prefix/` up to `prefix0` covers
    /// exactly the paths below `prefix`. The root has no upper bound.
    fn descendant_range(prefix: &str) -> (String, Option<String>) {
        match prefix {
            "" => (String::new(), None),
            prefix => (format!("{prefix}/"), Some(format!("{prefix}0"))),
        }
    }

    fn into_entries(rows: Vec<EntryRow>) -> Result<Vec<PathEntry>> {
        rows.into_iter().map(PathEntry::try_from).collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace the entry at `entry.path`, returning the prior row.
    #[instrument(skip(self, entry), fields(path = %entry.path))]
    pub async fn upsert(&self, entry: &PathEntry) -> Result<Option<PathEntry>> {
        let normalized = PathEntry {
            path: Self::normalize(&entry.path)?,
            ..entry.clone()
        };
        let row = EntryRow::try_from(&normalized)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let prior: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(&row.path)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_entry.sql"))
            .bind(row.path)
            .bind(row.parent)
            .bind(row.is_dir)
            .bind(row.size)
            .bind(row.fingerprint)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        prior.map(PathEntry::try_from).transpose()
    }

    /// Remove the entry at `path`, returning it. Absence is not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<Option<PathEntry>> {
        let path = Self::normalize(path)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let prior: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(&path)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if prior.is_some() {
            sqlx::query(include_str!("../queries/delete_entry.sql"))
                .bind(&path)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        prior.map(PathEntry::try_from).transpose()
    }

    /// Remove every descendant of `prefix` (not the prefix row itself).
    ///
    /// Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn delete_subtree(&self, prefix: &str) -> Result<u64> {
        let (lower, upper) = Self::descendant_range(&Self::normalize(prefix)?);
        let result = sqlx::query(include_str!("../queries/delete_subtree.sql"))
            .bind(lower)
            .bind(upper)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, path: &str) -> Result<Option<PathEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(Self::normalize(path)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(PathEntry::try_from).transpose()
    }

    /// Direct children of `prefix`, excluding the prefix's own entry.
    pub async fn list_children(&self, prefix: &str) -> Result<Vec<PathEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_children.sql"))
            .bind(Self::normalize(prefix)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::into_entries(rows)
    }

    /// Every descendant of `prefix` at any depth, excluding the prefix itself.
    pub async fn list_subtree(&self, prefix: &str) -> Result<Vec<PathEntry>> {
        let (lower, upper) = Self::descendant_range(&Self::normalize(prefix)?);
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_subtree.sql"))
            .bind(lower)
            .bind(upper)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::into_entries(rows)
    }

    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_entries.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Apply `policy`: drop rows older than `max_age`, then the oldest rows
    /// beyond `max_entries`. Returns the number of rows removed.
    ///
    /// Nothing else in the workspace removes rows to bound the index; this
    /// only runs when asked to.
    #[instrument(skip(self))]
    pub async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        if policy.is_unbounded() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        if let Some(max_age) = policy.max_age {
            let cutoff = OffsetDateTime::now_utc()
                .checked_sub(time::Duration::try_from(max_age).or_raise(|| ErrorKind::InvalidData("max age"))?)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            removed += sqlx::query(include_str!("../queries/prune_expired.sql"))
                .bind(format_timestamp(cutoff)?)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        if let Some(max_entries) = policy.max_entries {
            let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_entries.sql"))
                .fetch_one(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let max_entries = i64::try_from(max_entries).unwrap_or(i64::MAX);
            if count > max_entries {
                removed += sqlx::query(include_str!("../queries/prune_oldest.sql"))
                    .bind(count - max_entries)
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?
                    .rows_affected();
            }
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(removed, "pruned path index");
        Ok(removed)
    }
}
