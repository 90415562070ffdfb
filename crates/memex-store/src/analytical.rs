use crate::error::StoreError;
use crate::schema::INIT_SCHEMA_SQL;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Structured store backing the cache index and the audit trail.
///
/// Rows come back as owned [`Value`]s so callers never hold references into
/// the engine.
pub trait AnalyticalStore: Send + Sync {
    /// Run a write or DDL statement. Without parameters, `sql` may contain
    /// several `;`-separated statements.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<(), StoreError>;

    /// Fetch the first row. Returns [`StoreError::NotFound`] when there is none.
    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StoreError>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// SQLite behind a single connection. The engine does not support concurrent
/// writers, so every call queues on the mutex.
pub struct SqliteAnalyticalStore {
    conn: Mutex<Connection>,
}

impl SqliteAnalyticalStore {
    pub const FILE_NAME: &'static str = "memex.db";

    /// Open `<base>/memex.db` and apply the schema.
    pub fn open(base: &Path) -> Result<Self, StoreError> {
        let path = base.join(Self::FILE_NAME);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(INIT_SCHEMA_SQL)
            .map_err(StoreError::Schema)?;

        debug!(path = %path.display(), "analytical store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl AnalyticalStore for SqliteAnalyticalStore {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if params.is_empty() {
            conn.execute_batch(sql)?;
        } else {
            conn.execute(sql, params_from_iter(params.iter()))?;
        }
        Ok(())
    }

    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(sql, params_from_iter(params.iter()), row_values)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Analytical(other),
            })
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), row_values)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Analytical(e))
    }
}

fn row_values(row: &Row<'_>) -> rusqlite::Result<Vec<Value>> {
    let count = row.as_ref().column_count();
    (0..count).map(|i| row.get::<_, Value>(i)).collect()
}
