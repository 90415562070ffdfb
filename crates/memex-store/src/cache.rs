use crate::codec::{take_blob, take_text, take_timestamp, take_vector, timestamp_to_value, vector_to_bytes};
use crate::error::StoreError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;

/// A cached upstream response.
///
/// `hash_key` is computed by the caller from the scope salt and the request;
/// the store only persists and looks it up.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub hash_key: String,
    pub scope_id: String,
    /// Digest of the system/instruction part of the request.
    pub system_hash: String,
    /// Reserved for similarity search. Persisted, never matched on.
    pub prompt_vector: Vec<f32>,
    pub response_blob: Vec<u8>,
    /// Stamped with the insertion time when `None`.
    pub created_at: Option<DateTime<Utc>>,
}

const SELECT_CACHE_SQL: &str = "SELECT hash_key, scope_id, system_hash, prompt_vector, response_blob, created_at
     FROM cache_entries WHERE hash_key = ?1";

const UPSERT_CACHE_SQL: &str = "INSERT OR REPLACE INTO cache_entries
     (hash_key, scope_id, system_hash, prompt_vector, response_blob, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

impl Store {
    /// Look up a cache entry. A miss is [`StoreError::NotFound`].
    pub fn get_cache(&self, hash_key: &str) -> Result<CacheEntry, StoreError> {
        let mut row = self
            .olap()
            .query_row(SELECT_CACHE_SQL, &[Value::Text(hash_key.to_string())])?;
        if row.len() != 6 {
            return Err(StoreError::Decode { column: "cache_entries" });
        }

        Ok(CacheEntry {
            hash_key: take_text(&mut row, 0, "hash_key")?,
            scope_id: take_text(&mut row, 1, "scope_id")?,
            system_hash: take_text(&mut row, 2, "system_hash")?,
            prompt_vector: take_vector(&mut row, 3, "prompt_vector")?,
            response_blob: take_blob(&mut row, 4, "response_blob")?,
            created_at: Some(take_timestamp(&mut row, 5, "created_at")?),
        })
    }

    /// Insert or replace the entry for `entry.hash_key`; last write wins.
    pub fn set_cache(&self, entry: &mut CacheEntry) -> Result<(), StoreError> {
        let created_at = *entry.created_at.get_or_insert_with(Utc::now);

        self.olap().execute(
            UPSERT_CACHE_SQL,
            &[
                Value::Text(entry.hash_key.clone()),
                Value::Text(entry.scope_id.clone()),
                Value::Text(entry.system_hash.clone()),
                Value::Blob(vector_to_bytes(&entry.prompt_vector)),
                Value::Blob(entry.response_blob.clone()),
                timestamp_to_value(&created_at),
            ],
        )
    }
}
