use crate::error::StoreError;
use rocksdb::{Options, DB};
use std::path::Path;
use tracing::debug;

/// Values at least this large are written to blob files instead of the LSM tree.
const MIN_BLOB_SIZE: u64 = 4 * 1024;
/// Blob (value-log) file size. Large segments keep compaction cheap for big
/// response bodies.
const BLOB_FILE_SIZE: u64 = 256 * 1024 * 1024;
const WRITE_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Content-addressable key/value store for binary payloads.
///
/// Implementations must allow concurrent readers and serialize writers
/// internally; callers never lock.
pub trait BlobStore: Send + Sync {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Returns [`StoreError::NotFound`] when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

pub struct RocksBlobStore {
    db: DB,
}

impl RocksBlobStore {
    pub const DIR_NAME: &'static str = "blobs";

    /// Open (or create) the store at `<base>/blobs`.
    pub fn open(base: &Path) -> Result<Self, StoreError> {
        let path = base.join(Self::DIR_NAME);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_enable_blob_files(true);
        opts.set_min_blob_size(MIN_BLOB_SIZE);
        opts.set_blob_file_size(BLOB_FILE_SIZE);
        opts.set_enable_blob_gc(true);
        opts.set_write_buffer_size(WRITE_BUFFER_SIZE);

        let db = DB::open(&opts, &path)?;
        debug!(path = %path.display(), "blob store opened");
        Ok(Self { db })
    }
}

impl BlobStore for RocksBlobStore {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.put(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.db.get(key)?.ok_or(StoreError::NotFound)
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        let flushed = self.db.flush();
        self.db.cancel_all_background_work(true);
        drop(self);
        flushed.map_err(StoreError::from)
    }
}
