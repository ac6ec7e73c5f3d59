//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Index round trips are short; a handful of connections covers concurrent requests.
const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Database connection pool for the path index.
///
/// This is the main entry point for interacting with the index database.
/// It manages the SQLite connection pool; build a [`PathIndex`](crate::PathIndex)
/// from it to read and write entries.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Pooled connections each need the pragmas, not just the first.
            .after_connect(|conn, meta| Box::pin(async move {
                Self::apply_pragmas(conn, meta).await
            }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the index database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Database)?;
        }
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// An index that lives as long as the pool, for tests and throwaway runs.
    /// Not gated on `cfg(test)` because the manager's tests use it too.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every in-memory connection is its own database.
        Self::new(options, Some(1)).await
    }

    /// Options shared by the file and in-memory index.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Readers keep answering listings while a refresh writes.
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Listings upsert one row per child in separate round trips, so
            // concurrent requests regularly queue behind the single writer.
            .busy_timeout(BUSY_TIMEOUT)
    }

    /// Per-connection settings; the index is rebuildable, so its pages stay in memory.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query("PRAGMA cache_size = -4096; PRAGMA temp_store = MEMORY;").execute(conn).await?;
        Ok(())
    }

    #[instrument("migrating path index", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool once every connection has been returned to it.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
