//! Single-writer `DuckDB` connection handle.
//!
//! `DuckDB` connections must not be driven concurrently from several threads,
//! so every store handle owns exactly one connection behind a mutex. Cloning
//! the handle shares the same connection and the same lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::Connection;

use crate::StoreError;

struct HandleInner {
    db_path: PathBuf,
    connection: Mutex<Connection>,
}

/// Serialized access to the store's database connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Open (or create) the database file and configure the connection.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = path.into();
        let connection = Connection::open(db_path.as_path())?;
        configure_connection(&connection)?;
        Ok(Self {
            inner: Arc::new(HandleInner {
                db_path,
                connection: Mutex::new(connection),
            }),
        })
    }

    /// Run `f` while holding the connection lock.
    ///
    /// # Errors
    /// Returns whatever `f` returns, or [`StoreError::LockPoisoned`] when a
    /// previous holder panicked mid-operation.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let connection = self.lock()?;
        f(&connection)
    }

    /// Run `f` inside a transaction while holding the connection lock.
    ///
    /// Commits when `f` succeeds and rolls back otherwise.
    ///
    /// # Errors
    /// Returns the error produced by `f` or by `BEGIN`/`COMMIT`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let connection = self.lock()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = f(&connection);
        finalize_transaction(&connection, result)
    }

    /// Path of the database file backing this handle.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.inner
            .connection
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }
}

/// Commit on success, roll back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}
