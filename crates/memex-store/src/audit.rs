use crate::codec::{take_integer, take_real, take_text, take_timestamp, timestamp_to_value};
use crate::error::StoreError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;

/// One row per completed proxied request. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditLog {
    /// Stamped with the write time when `None`.
    pub timestamp: Option<DateTime<Utc>>,
    pub scope_id: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost: f64,
    pub latency_ms: i64,
}

const INSERT_AUDIT_SQL: &str = "INSERT INTO audit_logs (timestamp, scope_id, tokens_in, tokens_out, cost, latency)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const SELECT_AUDIT_BY_SCOPE_SQL: &str = "SELECT timestamp, scope_id, tokens_in, tokens_out, cost, latency
     FROM audit_logs WHERE scope_id = ?1
     ORDER BY timestamp DESC, id DESC LIMIT ?2";

impl Store {
    pub fn write_log(&self, entry: &mut AuditLog) -> Result<(), StoreError> {
        let timestamp = *entry.timestamp.get_or_insert_with(Utc::now);

        self.olap().execute(
            INSERT_AUDIT_SQL,
            &[
                timestamp_to_value(&timestamp),
                Value::Text(entry.scope_id.clone()),
                Value::Integer(entry.tokens_in),
                Value::Integer(entry.tokens_out),
                Value::Real(entry.cost),
                Value::Integer(entry.latency_ms),
            ],
        )
    }

    /// Most recent audit rows for a scope, newest first.
    pub fn audit_logs_for_scope(&self, scope_id: &str, limit: usize) -> Result<Vec<AuditLog>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.olap().query(
            SELECT_AUDIT_BY_SCOPE_SQL,
            &[Value::Text(scope_id.to_string()), Value::Integer(limit)],
        )?;

        rows.into_iter()
            .map(|mut row| {
                if row.len() != 6 {
                    return Err(StoreError::Decode { column: "audit_logs" });
                }
                Ok(AuditLog {
                    timestamp: Some(take_timestamp(&mut row, 0, "timestamp")?),
                    scope_id: take_text(&mut row, 1, "scope_id")?,
                    tokens_in: take_integer(&row, 2, "tokens_in")?,
                    tokens_out: take_integer(&row, 3, "tokens_out")?,
                    cost: take_real(&row, 4, "cost")?,
                    latency_ms: take_integer(&row, 5, "latency")?,
                })
            })
            .collect()
    }
}
