//! Channel release marker
//!
//! The marker is the single source of truth for "has this commit already
//! been published for this channel". It is consulted before any work
//! happens and written only after every other object is in place, which is
//! what makes the whole pipeline idempotent and atomic from a reader's
//! point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ManifestError;
use crate::store::{ObjectStore, StoreError};

/// Schema version for the release marker
pub const MARKER_SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const MARKER_SCHEMA_ID: &str = "dist-promote/release-marker@1";

/// The per-channel record of the last completed publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseMarker {
    pub schema_version: u32,
    pub schema_id: String,
    pub channel: String,
    pub commit: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
}

impl ReleaseMarker {
    pub fn new(channel: &str, commit: &str, version: &str) -> Self {
        Self {
            schema_version: MARKER_SCHEMA_VERSION,
            schema_id: MARKER_SCHEMA_ID.to_string(),
            channel: channel.to_string(),
            commit: commit.to_string(),
            version: version.to_string(),
            published_at: Utc::now(),
        }
    }

    /// Object key of the marker for a channel
    pub fn key(upload_prefix: &str, channel: &str) -> String {
        format!("{}/markers/channel-{}.json", upload_prefix, channel)
    }

    /// Whether this marker already records the given release
    pub fn matches(&self, commit: &str, version: &str) -> bool {
        self.commit == commit && self.version == version
    }

    /// Load the marker from the public store; `None` when no release has
    /// ever completed for this channel.
    pub fn load(
        store: &dyn ObjectStore,
        upload_prefix: &str,
        channel: &str,
    ) -> Result<Option<Self>, ManifestError> {
        match store.get(&Self::key(upload_prefix, channel)) {
            Ok(bytes) => {
                let marker = serde_json::from_slice(&bytes)?;
                Ok(Some(marker))
            }
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsStore, PutOptions};
    use tempfile::TempDir;

    #[test]
    fn test_marker_key() {
        assert_eq!(
            ReleaseMarker::key("dist", "nightly"),
            "dist/markers/channel-nightly.json"
        );
    }

    #[test]
    fn test_matches() {
        let marker = ReleaseMarker::new("nightly", "abc", "nightly");
        assert!(marker.matches("abc", "nightly"));
        assert!(!marker.matches("def", "nightly"));
        assert!(!marker.matches("abc", "beta"));
    }

    #[test]
    fn test_load_absent_marker() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(ReleaseMarker::load(&store, "dist", "nightly")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());

        let marker = ReleaseMarker::new("nightly", "abc123", "nightly");
        store
            .put(
                &ReleaseMarker::key("dist", "nightly"),
                marker.to_json().unwrap().as_bytes(),
                &PutOptions::default(),
            )
            .unwrap();

        let loaded = ReleaseMarker::load(&store, "dist", "nightly")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.commit, "abc123");
        assert!(loaded.matches("abc123", "nightly"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        store
            .put(
                &ReleaseMarker::key("dist", "nightly"),
                b"not json",
                &PutOptions::default(),
            )
            .unwrap();

        assert!(ReleaseMarker::load(&store, "dist", "nightly").is_err());
    }
}
