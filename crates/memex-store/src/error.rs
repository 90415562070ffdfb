use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blob store error: {0}")]
    Blob(#[from] rocksdb::Error),

    #[error("analytical store error: {0}")]
    Analytical(#[from] rusqlite::Error),

    #[error("failed to initialize analytical schema: {0}")]
    Schema(#[source] rusqlite::Error),

    /// The key or row does not exist. A cache miss, not an I/O failure.
    #[error("not found")]
    NotFound,

    #[error("unexpected value in column {column}")]
    Decode { column: &'static str },

    #[error("analytical store connection poisoned by a panicked writer")]
    Poisoned,

    #[error("errors closing store: {}", join_errors(.0))]
    Close(Vec<StoreError>),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

fn join_errors(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
