//! EventStore - durable queue of captured events.
//!
//! Events are appended by the capture layer, read in bulk by the sync engine
//! and deleted only once the collector has acknowledged them.

use crate::error::StoreError;
use crate::event::{EventRecord, EventType};
use crate::storage::Database;
use rusqlite::{params, Connection, ErrorCode, Row};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Keyed event table with timestamp and type indexes.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Database>,
}

/// Raw row before the payload is decoded.
struct StoredRow {
    id: String,
    schema_version: u32,
    event_type: String,
    timestamp: i64,
    payload: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            schema_version: row.get(1)?,
            event_type: row.get(2)?,
            timestamp: row.get(3)?,
            payload: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<EventRecord, StoreError> {
        let payload: Map<String, Value> =
            serde_json::from_str(&self.payload).map_err(|source| StoreError::CorruptPayload {
                id: self.id.clone(),
                source,
            })?;

        Ok(EventRecord {
            id: self.id,
            schema_version: self.schema_version,
            event_type: EventType::parse(&self.event_type),
            timestamp: self.timestamp,
            payload,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, schema_version, type, ts, payload FROM events";

impl EventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Self {
        Self::new(Arc::new(Database::open_in_memory()))
    }

    /// Insert a new event. An existing id is an integrity failure.
    pub fn append(&self, record: &EventRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&record.payload)?;

        self.db.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO events (id, schema_version, type, ts, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.schema_version,
                    record.event_type.as_str(),
                    record.timestamp,
                    payload
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateId(record.id.clone()))
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Every stored event. Order is unspecified.
    pub fn get_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.db
            .with_conn(|conn| query_records(conn, SELECT_COLUMNS, params![]))
    }

    /// Events with `start <= ts <= end`, oldest first.
    pub fn get_by_time_range(&self, start: i64, end: i64) -> Result<Vec<EventRecord>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE ts BETWEEN ?1 AND ?2 ORDER BY ts");
        self.db
            .with_conn(|conn| query_records(conn, &sql, params![start, end]))
    }

    /// Events of one type, oldest first.
    pub fn get_by_type(&self, event_type: &EventType) -> Result<Vec<EventRecord>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE type = ?1 ORDER BY ts");
        self.db
            .with_conn(|conn| query_records(conn, &sql, params![event_type.as_str()]))
    }

    /// Remove the given ids in one transaction. Either all are removed or,
    /// on error, none are. Returns the number of rows removed.
    pub fn delete_many(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM events WHERE id = ?1")?;
                for id in ids {
                    removed += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            debug!("[EventStore] Deleted {} of {} requested events", removed, ids.len());
            Ok(removed)
        })
    }

    /// Total number of stored events.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Number of stored events per type, most frequent first.
    pub fn count_by_type(&self) -> Result<Vec<(EventType, usize)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT type, COUNT(*) AS n FROM events GROUP BY type ORDER BY n DESC, type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = Vec::new();
            for row in rows {
                let (tag, count) = row?;
                counts.push((EventType::parse(&tag), count as usize));
            }
            Ok(counts)
        })
    }

    /// Remove every event unconditionally. Returns the number removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM events", [])?;
            info!("[EventStore] Cleared {} events", removed);
            Ok(removed)
        })
    }
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<EventRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, StoredRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(StoredRow::into_record).collect()
}
