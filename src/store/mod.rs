//! Object store abstraction
//!
//! The pipeline talks to two stores: the read-only CI artifact bucket and
//! the read/write public distribution bucket. Both are reached through the
//! `ObjectStore` trait so a local stand-in can be substituted without the
//! pipeline noticing: `S3Store` drives the `aws` CLI (with an optional
//! endpoint override for non-AWS backends), `FsStore` is a plain directory.

mod fs;
mod s3;

pub use fs::FsStore;
pub use s3::{S3Store, S3StoreConfig};

/// Per-object write metadata
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Storage class for the written object (e.g. `INTELLIGENT_TIERING`)
    pub storage_class: Option<String>,

    /// Cache-control header served with the object
    pub cache_control: Option<String>,
}

/// Errors from object store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Whether the failure is worth retrying (network/CLI trouble, not a
    /// definitive missing object)
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Command(_))
    }
}

/// An object store keyed by `/`-separated string keys
pub trait ObjectStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    fn put(&self, key: &str, bytes: &[u8], options: &PutOptions) -> Result<(), StoreError>;
}

/// Write `key` only if it is not already present.
///
/// `produce` runs only when the key is missing, so a staged artifact that
/// already exists at the destination costs one existence check and no
/// transfer. Both the artifact source client and the publisher go through
/// this single helper. Returns whether a write happened.
pub fn ensure_present(
    store: &dyn ObjectStore,
    key: &str,
    options: &PutOptions,
    produce: impl FnOnce() -> Result<Vec<u8>, StoreError>,
) -> Result<bool, StoreError> {
    if store.exists(key)? {
        return Ok(false);
    }
    let bytes = produce()?;
    store.put(key, &bytes, options)?;
    Ok(true)
}
