//! SQLite storage layer for the orchestrator.
//!
//! The store is a single file shared with an external reader service, so
//! every connection enables WAL journaling with NORMAL fsync discipline and
//! a generous busy timeout. Schema management lives in [`schema`] and is
//! fully idempotent; typed queries live in the entity modules.

pub mod artifacts;
pub mod prompts;
pub mod schema;
pub mod writings;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::StorageError;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Maximum attempts for operations hitting SQLite lock contention.
const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff, in milliseconds.
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Initialize the SQLite database shared with the reader service.
///
/// Creates the database file and parent directories if they don't exist,
/// configures WAL mode for concurrent read/write access, runs the idempotent
/// schema migration, and returns a connection pool.
pub async fn init_db(db_path: &str) -> Result<DbPool, StorageError> {
    let expanded = expand_tilde(db_path);

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                source: sqlx::Error::Configuration(
                    format!("failed to create directory {}: {e}", parent.display()).into(),
                ),
            })?;
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{expanded}"))
        .map_err(|e| StorageError::Connection { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .pragma("cache_size", "10000")
        .pragma("temp_store", "memory")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    schema::migrate(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory SQLite database for testing.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::Connection { source: e })?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    schema::migrate(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory SQLite pool without running the migration,
/// for tests that exercise migration against legacy schemas.
#[cfg(test)]
pub(crate) async fn init_test_db_bare() -> DbPool {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("parse options")
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .expect("connect in-memory db")
}

/// Force a truncating WAL checkpoint so the reader service observes a
/// compact, up-to-date database file immediately after a tick.
pub async fn checkpoint(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Run a storage operation, retrying on "database is locked" contention.
///
/// Retries up to 3 attempts with exponential backoff (100 ms base, doubling)
/// plus 0–100 ms of uniform jitter. Non-locking errors propagate on the
/// first occurrence.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_locked() && attempt + 1 < RETRY_MAX_ATTEMPTS => {
                let jitter: u64 = rand::thread_rng().gen_range(0..100);
                let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt) + jitter;
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay,
                    "database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn init_test_db_creates_core_tables() {
        let pool = init_test_db().await.expect("init test db");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query tables");

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"prompts"));
        assert!(names.contains(&"prompt_writings"));
        assert!(names.contains(&"prompt_artifacts"));
        assert!(names.contains(&"writings"));
    }

    #[tokio::test]
    async fn init_db_creates_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("poets.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db(&db_path_str).await.expect("init db");
        assert!(db_path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn checkpoint_succeeds_on_wal_database() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("poets.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.expect("init db");

        checkpoint(&pool).await.expect("checkpoint");
        pool.close().await;
    }

    #[tokio::test]
    async fn with_retry_passes_through_success() {
        let result = with_retry(|| async { Ok::<_, StorageError>(42) }).await;
        assert_eq!(result.expect("ok"), 42);
    }

    #[tokio::test]
    async fn with_retry_retries_locked_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Query {
                        source: sqlx::Error::Protocol("database is locked".to_string()),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.expect("eventually ok"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StorageError> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::Query {
                    source: sqlx::Error::Protocol("database is locked".to_string()),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_propagates_non_locking_errors_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StorageError> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::Query {
                    source: sqlx::Error::Protocol("syntax error".to_string()),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths_alone() {
        assert_eq!(expand_tilde("/var/db/poets.db"), "/var/db/poets.db");
    }
}
