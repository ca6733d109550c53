//! Release manifest
//!
//! The publishable description of a release: for every target, the
//! components present and the public path, checksum, and size of each
//! archive format. Checksums are always computed from the staged bytes so
//! the signature covers exactly what is published, never upstream
//! metadata. Maps are `BTreeMap` and the signing bytes go through JCS, so
//! identical inputs serialize to identical bytes.

mod marker;

pub use marker::ReleaseMarker;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::StagedArtifact;
use crate::store::{ObjectStore, StoreError};

/// Schema version for the release manifest
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "dist-promote/manifest@1";

/// Errors from manifest operations
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonicalization error: {0}")]
    Canonical(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// One published archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Public object key, e.g. `dist/2020-10-08/rustc-nightly-x86_64-unknown-linux-gnu.tar.xz`
    pub path: String,

    /// SHA-256 of the published bytes, hex-encoded
    pub sha256: String,

    /// Byte length
    pub size: u64,
}

/// A component within a target: one entry per archive format (`xz`, `gz`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub files: BTreeMap<String, FileEntry>,
}

/// The release manifest for one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub channel: String,
    pub version: String,
    pub commit: String,
    /// Release date, `YYYY-MM-DD`; also the dated path segment
    pub date: String,
    pub targets: BTreeMap<String, BTreeMap<String, ComponentEntry>>,
}

impl ReleaseManifest {
    /// Build the manifest from the staged artifact set.
    ///
    /// A (component, target) pair that never staged is simply absent.
    pub fn build(
        channel: &str,
        version: &str,
        commit: &str,
        date: &str,
        upload_prefix: &str,
        staged: &[StagedArtifact],
    ) -> Result<Self, ManifestError> {
        let entries = staged
            .par_iter()
            .map(|artifact| {
                let bytes = fs::read(&artifact.path)?;
                let entry = FileEntry {
                    path: format!("{}/{}/{}", upload_prefix, date, artifact.file_name),
                    sha256: sha256_hex(&bytes),
                    size: bytes.len() as u64,
                };
                Ok((
                    artifact.target.clone(),
                    artifact.component.clone(),
                    archive_format(&artifact.file_name),
                    entry,
                ))
            })
            .collect::<Result<Vec<_>, std::io::Error>>()?;

        let mut targets: BTreeMap<String, BTreeMap<String, ComponentEntry>> = BTreeMap::new();
        for (target, component, format, entry) in entries {
            targets
                .entry(target)
                .or_default()
                .entry(component)
                .or_insert_with(|| ComponentEntry {
                    files: BTreeMap::new(),
                })
                .files
                .insert(format, entry);
        }

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            channel: channel.to_string(),
            version: version.to_string(),
            commit: commit.to_string(),
            date: date.to_string(),
            targets,
        })
    }

    /// Public object name of the channel manifest
    pub fn file_name(channel: &str) -> String {
        format!("channel-{}.json", channel)
    }

    /// The byte sequence that gets signed: JCS canonical JSON.
    ///
    /// Identical manifests canonicalize to identical bytes, which keeps
    /// signing reproducible for downstream verification tooling.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json_canonicalizer::to_vec(self).map_err(|e| ManifestError::Canonical(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Number of (target, component, format) file entries
    pub fn file_count(&self) -> usize {
        self.targets
            .values()
            .flat_map(|components| components.values())
            .map(|c| c.files.len())
            .sum()
    }

    /// Every file entry, flattened
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.targets
            .values()
            .flat_map(|components| components.values())
            .flat_map(|component| component.files.values())
    }

    /// Re-download every listed file from `store` and compare checksums.
    ///
    /// Returns a description per mismatching or missing object; empty
    /// means the published release matches its manifest.
    pub fn verify_published(&self, store: &dyn ObjectStore) -> Result<Vec<String>, ManifestError> {
        let mut problems = Vec::new();
        for entry in self.files() {
            match store.get(&entry.path) {
                Ok(bytes) => {
                    let actual = sha256_hex(&bytes);
                    if actual != entry.sha256 {
                        problems.push(format!(
                            "{}: checksum mismatch (manifest {}, published {})",
                            entry.path, entry.sha256, actual
                        ));
                    }
                }
                Err(StoreError::NotFound { .. }) => {
                    problems.push(format!("{}: missing from the public store", entry.path));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(problems)
    }
}

/// Archive format key for a file name (`xz`, `gz`)
fn archive_format(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string()
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Contents of the `.sha256` sidecar published next to each artifact
pub fn sha256_sidecar(file_name: &str, sha256: &str) -> String {
    format!("{}  {}\n", sha256, file_name)
}
