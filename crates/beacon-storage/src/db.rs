//! SQLite connection shared by the attribute and event stores.
//!
//! One connection per process, guarded by a mutex. File databases run in
//! WAL mode with `synchronous = NORMAL`; the schema is migrated inside a
//! transaction before the handle is returned.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use beacon_core::error::BeaconError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
                            PRAGMA synchronous = NORMAL;";

/// How long a writer waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IN_MEMORY: &str = ":memory:";

/// Map a rusqlite error into a storage error with some context.
pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> BeaconError {
    move |e| BeaconError::Storage(format!("{}: {}", context, e))
}

/// Handle to the Beacon database.
pub struct Database {
    conn: Mutex<Connection>,
    location: String,
}

impl Database {
    /// Open or create the database file at `path`, creating missing parent
    /// directories.
    pub fn new(path: &Path) -> Result<Self, BeaconError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(storage_err("Failed to set busy timeout"))?;
        conn.execute_batch(FILE_PRAGMAS)
            .map_err(storage_err("Failed to set pragmas"))?;

        Self::open(conn, path.display().to_string())
    }

    /// A private in-memory database, gone when dropped.
    pub fn in_memory() -> Result<Self, BeaconError> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("Failed to open in-memory database"))?;
        Self::open(conn, IN_MEMORY.to_string())
    }

    fn open(conn: Connection, location: String) -> Result<Self, BeaconError> {
        let db = Self {
            conn: Mutex::new(conn),
            location,
        };
        db.with_transaction(|tx| migrations::run_migrations(tx))?;
        info!(location = db.location.as_str(), "Database ready");
        Ok(db)
    }

    /// Where the database lives: a file path, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, BeaconError>
    where
        F: FnOnce(&Connection) -> Result<T, BeaconError>,
    {
        f(&self.lock())
    }

    /// Run `f` inside a transaction. It commits when `f` succeeds and rolls
    /// back when `f` fails.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, BeaconError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, BeaconError>,
    {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(storage_err("Failed to begin transaction"))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(storage_err("Failed to commit transaction"))?;
        debug!("Transaction committed");
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .finish()
    }
}
