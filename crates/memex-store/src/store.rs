use crate::analytical::{AnalyticalStore, SqliteAnalyticalStore};
use crate::blob::{BlobStore, RocksBlobStore};
use crate::error::StoreError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The blob and analytical engines under one base directory.
///
/// All methods take `&self`; share it behind an `Arc` across request tasks.
pub struct Store {
    path: PathBuf,
    kv: Box<dyn BlobStore>,
    olap: Box<dyn AnalyticalStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Store {
    /// Create `base` if needed and open both engines.
    ///
    /// On failure nothing stays open, and whatever this call created on disk
    /// (missing parent directories, `base`, engine files) is removed again.
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref();
        let created_root = first_missing_ancestor(base);

        if let Err(source) = fs::create_dir_all(base) {
            if let Some(root) = &created_root {
                remove_created(root);
            }
            return Err(StoreError::CreateDir {
                path: base.to_path_buf(),
                source,
            });
        }

        let fresh: Vec<PathBuf> = engine_paths(base).into_iter().filter(|p| !p.exists()).collect();

        match Self::open_engines(base) {
            Ok((kv, olap)) => {
                info!(path = %base.display(), "store opened");
                Ok(Self {
                    path: base.to_path_buf(),
                    kv,
                    olap,
                })
            }
            Err(e) => {
                match &created_root {
                    Some(root) => remove_created(root),
                    None => fresh.iter().for_each(|p| remove_created(p)),
                }
                Err(e)
            }
        }
    }

    fn open_engines(base: &Path) -> Result<(Box<dyn BlobStore>, Box<dyn AnalyticalStore>), StoreError> {
        let kv: Box<dyn BlobStore> = Box::new(RocksBlobStore::open(base)?);

        match SqliteAnalyticalStore::open(base) {
            Ok(olap) => Ok((kv, Box::new(olap))),
            Err(e) => {
                if let Err(close_err) = kv.close() {
                    warn!(error = %close_err, "failed to close blob store after analytical open failure");
                }
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kv(&self) -> &dyn BlobStore {
        self.kv.as_ref()
    }

    pub fn olap(&self) -> &dyn AnalyticalStore {
        self.olap.as_ref()
    }

    /// Close both engines, even if the first one fails.
    pub fn close(self) -> Result<(), StoreError> {
        let path = self.path;
        let errors: Vec<StoreError> = [self.kv.close(), self.olap.close()]
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            info!(path = %path.display(), "store closed");
            Ok(())
        } else {
            Err(StoreError::Close(errors))
        }
    }
}

/// The outermost directory `create_dir_all(base)` would have to create.
fn first_missing_ancestor(base: &Path) -> Option<PathBuf> {
    base.ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .last()
        .map(Path::to_path_buf)
}

/// Everything the engines may create directly under `base`.
fn engine_paths(base: &Path) -> [PathBuf; 4] {
    let db = SqliteAnalyticalStore::FILE_NAME;
    [
        base.join(RocksBlobStore::DIR_NAME),
        base.join(db),
        base.join(format!("{db}-wal")),
        base.join(format!("{db}-shm")),
    ]
}

fn remove_created(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return;
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to remove partially created store");
    }
}
