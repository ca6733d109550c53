//! Publisher
//!
//! Writes one release to the public store in the order that makes the
//! release atomic for readers: content objects first (artifacts and their
//! `.sha256` sidecars, in parallel), then the manifest, then the
//! signature, then the release marker. A reader that can see the marker is
//! guaranteed every object it references already exists. Any failure
//! aborts before the marker, leaving the previous release as the only
//! complete one.
//!
//! Artifacts are written under the dated path and copied to the top-level
//! "latest" path the installer resolves; dated writes go through
//! `ensure_present` so a retried run skips what a previous attempt already
//! uploaded.

use std::fs;
use std::sync::Mutex;

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::manifest::{sha256_hex, sha256_sidecar, ManifestError, ReleaseManifest, ReleaseMarker};
use crate::signer::ManifestSignature;
use crate::source::StagedArtifact;
use crate::store::{ensure_present, ObjectStore, PutOptions, StoreError};

/// Errors from publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read staged artifact {path}: {source}")]
    Staged {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("run cancelled before the release marker was written")]
    Cancelled,
}

/// The writes performed for one run; feeds invalidation and diagnostics
#[derive(Debug, Default)]
pub struct PublishRecord {
    /// Object keys written, in write order
    pub written: Vec<String>,

    /// Dated objects skipped because a previous attempt already wrote them
    pub skipped: usize,
}

/// Writes one release to the public store
pub struct Publisher<'a> {
    store: &'a dyn ObjectStore,
    upload_prefix: &'a str,
    date: &'a str,
    options: PutOptions,
    cancel: CancelToken,
}

impl<'a> Publisher<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        upload_prefix: &'a str,
        date: &'a str,
        options: PutOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            upload_prefix,
            date,
            options,
            cancel,
        }
    }

    fn dated_key(&self, file_name: &str) -> String {
        format!("{}/{}/{}", self.upload_prefix, self.date, file_name)
    }

    fn latest_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.upload_prefix, file_name)
    }

    /// Publish the full release. See the module docs for the ordering
    /// contract.
    pub fn publish(
        &self,
        staged: &[StagedArtifact],
        manifest: &ReleaseManifest,
        signature: &ManifestSignature,
        marker: &ReleaseMarker,
    ) -> Result<PublishRecord, PublishError> {
        let record = Mutex::new(PublishRecord::default());

        staged
            .par_iter()
            .map(|artifact| self.publish_artifact(artifact, &record))
            .collect::<Result<(), PublishError>>()?;

        let mut record = record.into_inner().expect("no poisoned publish record");

        if self.cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        // The manifest object is the canonical bytes the signature covers,
        // published verbatim.
        let manifest_name = ReleaseManifest::file_name(&manifest.channel);
        let manifest_bytes = manifest.canonical_bytes()?;
        for key in [self.dated_key(&manifest_name), self.latest_key(&manifest_name)] {
            self.write(&key, &manifest_bytes, &mut record)?;
        }

        let signature_name = ManifestSignature::file_name(&manifest_name);
        let signature_bytes = signature.to_json()?.into_bytes();
        for key in [
            self.dated_key(&signature_name),
            self.latest_key(&signature_name),
        ] {
            self.write(&key, &signature_bytes, &mut record)?;
        }

        if self.cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let marker_key = ReleaseMarker::key(self.upload_prefix, &marker.channel);
        self.write(&marker_key, marker.to_json()?.as_bytes(), &mut record)?;

        Ok(record)
    }

    /// Upload one artifact and its `.sha256` sidecar to the dated and
    /// latest keys.
    fn publish_artifact(
        &self,
        artifact: &StagedArtifact,
        record: &Mutex<PublishRecord>,
    ) -> Result<(), PublishError> {
        if self.cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let bytes = fs::read(&artifact.path).map_err(|source| PublishError::Staged {
            path: artifact.path.display().to_string(),
            source,
        })?;
        let sidecar = sha256_sidecar(&artifact.file_name, &sha256_hex(&bytes));
        let sidecar_name = format!("{}.sha256", artifact.file_name);

        let mut written = Vec::new();
        let mut skipped = 0;

        for (name, content) in [
            (&artifact.file_name, bytes.as_slice()),
            (&sidecar_name, sidecar.as_bytes()),
        ] {
            // Dated copies are content-stable within a run, so a retried
            // run can skip them; the latest copies must always overwrite.
            let dated = self.dated_key(name);
            let wrote = ensure_present(self.store, &dated, &self.options, || Ok(content.to_vec()))
                .map_err(|source| PublishError::Write {
                    key: dated.clone(),
                    source,
                })?;
            if wrote {
                written.push(dated);
            } else {
                skipped += 1;
            }

            let latest = self.latest_key(name);
            self.store
                .put(&latest, content, &self.options)
                .map_err(|source| PublishError::Write {
                    key: latest.clone(),
                    source,
                })?;
            written.push(latest);
        }

        let mut record = record.lock().expect("no poisoned publish record");
        record.written.extend(written);
        record.skipped += skipped;
        Ok(())
    }

    fn write(
        &self,
        key: &str,
        bytes: &[u8],
        record: &mut PublishRecord,
    ) -> Result<(), PublishError> {
        self.store
            .put(key, bytes, &self.options)
            .map_err(|source| PublishError::Write {
                key: key.to_string(),
                source,
            })?;
        record.written.push(key.to_string());
        Ok(())
    }
}
