//! `DuckDB` connection pool management.
//!
//! All pooled connections are cloned from a single root connection so that
//! every handle shares one database instance and its file lock.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ::duckdb::Connection;

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Connections used for lookups and range reads.
    ReadOnly,
    /// Connections used for upserts and migrations.
    ReadWrite,
}

impl AccessMode {
    const fn slot(self) -> usize {
        match self {
            Self::ReadOnly => 0,
            Self::ReadWrite => 1,
        }
    }
}

#[derive(Default)]
struct PoolState {
    root: Option<Connection>,
    idle: [Vec<Connection>; 2],
}

struct PoolInner {
    db_path: PathBuf,
    max_pool_size: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection pool manager for `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Create a new connection pool manager.
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_pool_size: max_pool_size.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Acquire a connection from the pool, opening the database on first use.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or a new
    /// connection cannot be cloned from the root handle.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self.inner.lock();
        let connection = match state.idle[mode.slot()].pop() {
            Some(connection) => connection,
            None => {
                if state.root.is_none() {
                    state.root = Some(Connection::open(self.inner.db_path.as_path())?);
                }
                let connection = match state.root.as_ref() {
                    Some(root) => root.try_clone()?,
                    None => Connection::open(self.inner.db_path.as_path())?,
                };
                configure_connection(&connection)?;
                connection
            }
        };
        drop(state);

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of idle connections currently parked for `mode`.
    #[must_use]
    pub fn idle_count(&self, mode: AccessMode) -> usize {
        self.inner.lock().idle[mode.slot()].len()
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection is only taken on drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection is only taken on drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut state = self.pool.lock();
        let idle = &mut state.idle[self.mode.slot()];
        if idle.len() < self.pool.max_pool_size {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn returned_connections_are_reused_up_to_pool_size() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("pool.duckdb"), 1);

        let first = manager.acquire(AccessMode::ReadWrite).expect("first");
        let second = manager.acquire(AccessMode::ReadWrite).expect("second");
        drop(first);
        drop(second);

        assert_eq!(manager.idle_count(AccessMode::ReadWrite), 1);
        assert_eq!(manager.idle_count(AccessMode::ReadOnly), 0);
    }

    #[test]
    fn cloned_connections_share_one_database() {
        let temp = tempdir().expect("tempdir");
        let manager = DuckDbConnectionManager::new(temp.path().join("pool.duckdb"), 2);

        let writer = manager.acquire(AccessMode::ReadWrite).expect("writer");
        writer
            .execute_batch("CREATE TABLE probe (id INTEGER); INSERT INTO probe VALUES (7);")
            .expect("create");

        let reader = manager.acquire(AccessMode::ReadOnly).expect("reader");
        let id: i32 = reader
            .query_row("SELECT id FROM probe", [], |row| row.get(0))
            .expect("select");
        assert_eq!(id, 7);
    }
}
