//! Directory-backed object store
//!
//! The local stand-in for an object store bucket: keys map to paths under
//! a root directory. Used for local pipeline runs (`file://` endpoint) and
//! throughout the test suite. Writes are write-then-rename so a reader
//! never observes a partially written object.

use std::fs;
use std::path::{Path, PathBuf};

use super::{ObjectStore, PutOptions, StoreError};

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory backing this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for FsStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.object_path(key).is_file())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    fn put(&self, key: &str, bytes: &[u8], _options: &PutOptions) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = path.with_extension("tmp.partial");
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &path)?;
        Ok(())
    }
}
