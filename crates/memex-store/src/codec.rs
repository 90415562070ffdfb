//! Conversions between domain fields and analytical column values.

use crate::error::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn timestamp_to_value(ts: &DateTime<Utc>) -> Value {
    Value::Text(ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

pub(crate) fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn take_text(values: &mut [Value], idx: usize, column: &'static str) -> Result<String, StoreError> {
    match std::mem::replace(&mut values[idx], Value::Null) {
        Value::Text(s) => Ok(s),
        _ => Err(StoreError::Decode { column }),
    }
}

pub(crate) fn take_blob(values: &mut [Value], idx: usize, column: &'static str) -> Result<Vec<u8>, StoreError> {
    match std::mem::replace(&mut values[idx], Value::Null) {
        Value::Blob(b) => Ok(b),
        Value::Null => Ok(Vec::new()),
        _ => Err(StoreError::Decode { column }),
    }
}

pub(crate) fn take_integer(values: &[Value], idx: usize, column: &'static str) -> Result<i64, StoreError> {
    match values[idx] {
        Value::Integer(i) => Ok(i),
        _ => Err(StoreError::Decode { column }),
    }
}

pub(crate) fn take_real(values: &[Value], idx: usize, column: &'static str) -> Result<f64, StoreError> {
    match values[idx] {
        Value::Real(r) => Ok(r),
        Value::Integer(i) => Ok(i as f64),
        _ => Err(StoreError::Decode { column }),
    }
}

pub(crate) fn take_timestamp(
    values: &mut [Value],
    idx: usize,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    let text = take_text(values, idx, column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Decode { column })
}

pub(crate) fn take_vector(values: &mut [Value], idx: usize, column: &'static str) -> Result<Vec<f32>, StoreError> {
    let bytes = take_blob(values, idx, column)?;
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Decode { column });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
