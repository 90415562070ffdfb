/// Analytical schema. Every statement is idempotent; applied on each open.
pub(crate) const INIT_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    hash_key TEXT PRIMARY KEY,
    scope_id TEXT NOT NULL,
    system_hash TEXT NOT NULL DEFAULT '',
    prompt_vector BLOB,
    response_blob BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_scope ON cache_entries(scope_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    tokens_in INTEGER NOT NULL DEFAULT 0,
    tokens_out INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0,
    latency INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
";
