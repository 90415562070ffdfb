//! Storage engine for the memex response cache and audit trail.
//!
//! Two embedded engines live under one base directory and share one
//! lifecycle:
//!
//! - `blobs/`: a RocksDB key/value store with key/value separation, tuned for
//!   large response payloads ([`BlobStore`]).
//! - `memex.db`: a SQLite database holding the `cache_entries` index and the
//!   append-only `audit_logs` table ([`AnalyticalStore`]).
//!
//! [`Store::open`] brings both up (and the schema with them) or neither;
//! [`Store::close`] shuts both down and reports every failure.

pub mod analytical;
pub mod audit;
pub mod blob;
pub mod cache;
mod codec;
pub mod error;
mod schema;
pub mod store;

pub use analytical::{AnalyticalStore, SqliteAnalyticalStore};
pub use audit::AuditLog;
pub use blob::{BlobStore, RocksBlobStore};
pub use cache::CacheEntry;
pub use error::StoreError;
pub use rusqlite::types::Value;
pub use store::Store;
