//! Database connection and schema management.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::{StorageError, StorageResult};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS audit_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        TEXT NOT NULL,
    request_id       TEXT NOT NULL,
    tool_name        TEXT NOT NULL,
    args             TEXT NOT NULL,
    signature        TEXT NOT NULL,
    decision         TEXT NOT NULL,
    resolution       TEXT,
    resolved_by      TEXT,
    resolved_at      TEXT,
    execution_result TEXT,
    agent_id         TEXT NOT NULL DEFAULT 'default'
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_tool ON audit_log(tool_name);

CREATE TABLE IF NOT EXISTS pending_requests (
    request_id TEXT PRIMARY KEY,
    tool_name  TEXT NOT NULL,
    args       TEXT NOT NULL,
    signature  TEXT NOT NULL,
    message_id TEXT,
    chat_id    INTEGER,
    result     TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_expires ON pending_requests(expires_at);
";

/// Handle to the gateway's SQLite database.
///
/// Cheap to clone; all methods take `&self`. The pool is sized for a single
/// writer; the orchestrator serializes writes per request id, and the
/// engine's own locking covers the rest.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// The file is created with mode `0600` where the platform supports
    /// POSIX modes; elsewhere this is a best-effort no-op.
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`] for filesystem failures,
    /// [`StorageError::Connection`] if SQLite cannot be opened.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        restrict_permissions(path)?;

        let db = Self { pool };
        db.initialize().await?;
        info!(path = %path.display(), "gateway database opened");
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    ///
    /// # Errors
    ///
    /// [`StorageError::Connection`] if the in-memory engine fails to start.
    pub async fn open_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(false)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Create tables and indexes if absent.
    async fn initialize(&self) -> StorageResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Close the connection pool, flushing outstanding writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| StorageError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> StorageResult<()> {
    Ok(())
}
