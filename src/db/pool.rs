// src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// `pool.run()` is the primary API for tool handlers (converts errors to
// DevctxError); `pool.interact()` returns anyhow::Result for internal
// helpers and background tasks. Both execute the closure on a blocking
// thread so database work never stalls the async runtime.

use crate::error::DevctxError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, HookError, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Rounds a busy-database write is retried before the error propagates.
/// The wait doubles each round starting at [`FIRST_RETRY_DELAY`]
/// (50ms, 100ms, 200ms, 400ms), which together with the connection's
/// busy_timeout outlasts any realistic writer.
const WRITE_RETRIES: u32 = 4;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(50);

/// SQLITE_BUSY (file databases under write contention) and SQLITE_LOCKED
/// (table locks on shared-cache databases) both clear on their own once
/// the competing writer finishes; nothing else is worth retrying.
fn is_busy(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi::ErrorCode;
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Look for a busy SQLite error anywhere in an anyhow chain. DevctxError::Db
/// exposes the wrapped rusqlite error as its source, so one walk covers
/// bare and wrapped errors alike. Plain string errors never match.
fn busy_in_chain(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<rusqlite::Error>().is_some_and(is_busy))
}

/// Database pool wrapper with per-connection setup.
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

/// Whether to use a file path or shared in-memory URI.
enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path and run schema setup.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database.
    ///
    /// Uses a shared cache URI so all connections access the same in-memory
    /// database. Without shared cache, each pooled connection would get its
    /// own separate empty database.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory).await
    }

    async fn open_internal(storage: DbStorage) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                prepare_db_dir(&p)?;
                let s = p.to_string_lossy().to_string();
                (s, Some(p), None, tuning_hook(true))
            }
            DbStorage::InMemory => {
                let uri = format!("file:memdb_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
                (uri.clone(), None, Some(uri), tuning_hook(false))
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool
            .interact(|conn| super::schema::run_migrations(conn))
            .await?;

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a connection from the pool.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors but not propagating.
    /// Use for low-priority best-effort operations (message recording, cursors).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", label, e);
                None
            }
        }
    }

    /// Run a closure that may return a rusqlite::Error.
    pub async fn interact_raw<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.interact(move |conn| f(conn).map_err(Into::into)).await
    }

    /// Run a closure and convert errors to DevctxError.
    ///
    /// This is the preferred method for tool handler implementations.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, DevctxError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<DevctxError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| DevctxError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| DevctxError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) but re-runs the closure while the database
    /// reports busy. Use for writes that must not be lost (job status
    /// transitions, git cursor advances); the closure must be `Clone`.
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, DevctxError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<DevctxError> + Send + 'static,
    {
        let mut delay = FIRST_RETRY_DELAY;
        for round in 1..=WRITE_RETRIES {
            match self.run(f.clone()).await {
                Err(DevctxError::Db(ref db)) if is_busy(db) => {
                    tracing::debug!(round, "database busy, retrying write in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
        self.run(f).await
    }

    /// Busy-retrying variant of [`interact`](Self::interact).
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        let mut delay = FIRST_RETRY_DELAY;
        for round in 1..=WRITE_RETRIES {
            match self.interact(f.clone()).await {
                Err(ref e) if busy_in_chain(e) => {
                    tracing::debug!(round, "database busy, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
        self.interact(f).await
    }
}

/// Create the database directory if needed. On Unix the directory is
/// restricted to the owning user, since it holds conversation history.
fn prepare_db_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    #[cfg(unix)]
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("restricting {}", dir.display()))?;
    Ok(())
}

/// Per-connection tuning applied from the pool's post-create hook.
///
/// File databases get WAL (readers never block the writer) and relaxed
/// fsync, which WAL makes safe. Both kinds enforce foreign keys and wait
/// out short write contention instead of failing; in-memory databases
/// skip the journal pragmas, which do not apply to them.
fn tune_connection(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "busy_timeout", 10_000)?;
    Ok(())
}

fn tuning_hook(file_backed: bool) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        Box::pin(async move {
            conn.interact(move |conn| tune_connection(conn, file_backed))
                .await
                .map_err(|e| HookError::Message(format!("connection hook: {e}").into()))?
                .map_err(|e| HookError::Message(format!("connection tuning: {e}").into()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[tokio::test]
    async fn test_pool_in_memory() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        let changed = pool
            .interact(|conn| {
                conn.execute(
                    "INSERT INTO code_entities (id, file_path, name, entity_type) \
                     VALUES ('e1', 'src/a.rs', 'a', 'function_declaration')",
                    [],
                )?;
                Ok(conn.changes())
            })
            .await
            .expect("Failed to insert");
        assert_eq!(changed, 1);

        // Verify from another connection in the pool (tests shared cache)
        let name: String = pool
            .interact(|conn| {
                conn.query_row("SELECT name FROM code_entities WHERE id = 'e1'", [], |row| {
                    row.get(0)
                })
                .map_err(Into::into)
            })
            .await
            .expect("Failed to query");
        assert_eq!(name, "a");
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let pool = std::sync::Arc::new(
            DatabasePool::open_in_memory()
                .await
                .expect("Failed to open pool"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.interact_with_retry(move |conn| {
                    conn.execute(
                        "INSERT INTO code_entities (id, file_path, name, entity_type) \
                         VALUES (?1, ?2, ?3, 'function_declaration')",
                        rusqlite::params![
                            format!("e{i}"),
                            format!("src/f{i}.rs"),
                            format!("fn{i}")
                        ],
                    )?;
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().expect("Insert failed");
        }

        let count: i64 = pool
            .interact(|conn| {
                conn.query_row("SELECT COUNT(*) FROM code_entities", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .await
            .expect("Count failed");
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn test_run_with_retry_fails_fast_on_sql_errors() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open pool");

        // A real SQL error is not busy and must not be retried away
        let result = pool
            .run_with_retry(|conn| {
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])?;
                Ok::<_, rusqlite::Error>(())
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_is_busy_codes() {
        assert!(is_busy(&sqlite_failure(5))); // SQLITE_BUSY
        assert!(is_busy(&sqlite_failure(6))); // SQLITE_LOCKED
        assert!(!is_busy(&sqlite_failure(19))); // SQLITE_CONSTRAINT
        assert!(!is_busy(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn test_busy_in_chain_finds_wrapped_errors() {
        // Bare rusqlite error
        let bare: anyhow::Error = sqlite_failure(5).into();
        assert!(busy_in_chain(&bare));

        // Wrapped in DevctxError::Db, surfaced through the source chain
        let wrapped: anyhow::Error = DevctxError::Db(sqlite_failure(6)).into();
        assert!(busy_in_chain(&wrapped));

        // Message-only errors never count as busy
        let message = anyhow::anyhow!("database is locked");
        assert!(!busy_in_chain(&message));
    }
}
