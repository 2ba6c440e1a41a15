//! Database connection management
//!
//! `Database` wraps the single SQLite connection behind a tokio mutex, so
//! transactions from concurrent tasks are serialized and each one sees a
//! consistent snapshot. `ConnectionManager` opens it lazily, once per
//! process, running pending migrations before handing it out.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use super::error::{StoreError, StoreResult};
use super::migration;
use super::schema::{Store, SCHEMA_VERSION};
use super::transaction::{Transaction, TransactionMode};

#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Schema version to upgrade the file to.
    pub target_version: u32,
    /// How long to wait for a competing lock before failing.
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            target_version: SCHEMA_VERSION,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl Database {
    /// Open the file at `path` and bring its schema up to `options.target_version`.
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let mut conn = Connection::open(path).map_err(|e| {
            StoreError::Connection(format!("Failed to open database at {:?}: {}", path, e))
        })?;
        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migration::migrate(&mut conn, options.target_version)?;

        info!(
            "Database opened at {:?} (schema version {})",
            path, options.target_version
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Get a locked connection
    ///
    /// Holding the guard blocks every other transaction on this handle.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Run `f` inside one transaction over `stores`.
    ///
    /// Commits when `f` returns `Ok`; any error rolls back every write made
    /// through the transaction.
    pub async fn transaction<T, F>(
        &self,
        stores: &[Store],
        mode: TransactionMode,
        f: F,
    ) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.lock().await;
        let behavior = match mode {
            TransactionMode::ReadOnly => TransactionBehavior::Deferred,
            TransactionMode::ReadWrite => TransactionBehavior::Immediate,
        };
        let tx = Transaction::new(conn.transaction_with_behavior(behavior)?, stores, mode);

        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if !e.is_not_found() {
                    warn!("Transaction over {:?} rolled back: {}", stores, e);
                }
                Err(e)
            }
        }
    }

    /// Get the database path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn schema_version(&self) -> StoreResult<u32> {
        let conn = self.lock().await;
        migration::current_version(&conn)
    }

    /// Whether both values share one underlying connection.
    pub fn same_handle(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Check if database is accessible (for health checks)
    pub async fn health_check(&self) -> bool {
        let conn = self.lock().await;
        match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => true,
            Err(e) => {
                warn!("Database health check failed: {}", e);
                false
            }
        }
    }
}

/// Owns the lazily opened connection for one database file.
#[derive(Debug)]
pub struct ConnectionManager {
    path: PathBuf,
    options: OpenOptions,
    db: OnceCell<Database>,
}

impl ConnectionManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, OpenOptions::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: OpenOptions) -> Self {
        Self {
            path: path.into(),
            options,
            db: OnceCell::new(),
        }
    }

    /// Return the ready connection, opening and migrating it on first use.
    ///
    /// Concurrent first callers wait on the same initialization. A failed
    /// open is not cached, so the next call tries again.
    pub async fn open(&self) -> StoreResult<Database> {
        let db = self
            .db
            .get_or_try_init(|| async {
                Database::open(&self.path, &self.options).map_err(|e| {
                    warn!("Opening {:?} failed: {}", self.path, e);
                    e
                })
            })
            .await?;
        Ok(db.clone())
    }

    pub fn is_open(&self) -> bool {
        self.db.initialized()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

static SHARED: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

/// Process-wide manager. The first caller decides the path and the handle
/// lives until the process exits; asking for a different path afterwards is
/// a `Connection` error.
pub fn shared(path: impl Into<PathBuf>, options: OpenOptions) -> StoreResult<Arc<ConnectionManager>> {
    let path = path.into();
    let manager = SHARED.get_or_init(|| Arc::new(ConnectionManager::with_options(path.clone(), options)));
    if manager.path() != path {
        return Err(StoreError::Connection(format!(
            "process database already bound to {:?}, cannot open {:?}",
            manager.path(),
            path
        )));
    }
    Ok(Arc::clone(manager))
}
