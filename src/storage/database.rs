//! Database - lazily opened SQLite handle shared by the event and state stores.
//!
//! The connection is opened on first use and kept for the lifetime of the
//! handle. All callers go through the same mutex, so concurrent first uses
//! never race to open the file twice.

use crate::error::StoreError;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

/// File name of the local database inside the data directory.
pub const DATABASE_FILE: &str = "tabtrail.db";

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Shared, lazily initialized SQLite connection.
pub struct Database {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl Database {
    /// Handle for the database file at `path`. Nothing is touched on disk
    /// until the first operation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            conn: Mutex::new(None),
        }
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Whether the connection has been opened yet.
    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|conn| conn.is_some()).unwrap_or(false)
    }

    /// Run `f` against the shared connection, opening it first if needed.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let conn = guard.insert(conn);
        f(conn)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }

                let conn = Connection::open(path).map_err(|source| StoreError::Open {
                    path: path.clone(),
                    source,
                })?;

                // WAL keeps readers from blocking the capture writer
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA busy_timeout = 5000;
                ",
                )?;
                info!("[Database] Opened {}", path.display());
                conn
            }
            Location::Memory => Connection::open_in_memory()?,
        };

        init_schema(&conn)?;
        Ok(conn)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY NOT NULL,
            schema_version INTEGER NOT NULL,
            type TEXT NOT NULL,
            ts INTEGER NOT NULL,
            payload TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);

        CREATE TABLE IF NOT EXISTS state (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );
    ",
    )?;
    Ok(())
}
