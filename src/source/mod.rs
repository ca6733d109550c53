//! Artifact source client
//!
//! Stages CI build artifacts for one commit into the local working
//! directory. Staging is stat-then-fetch through `ensure_present`: a file
//! already staged for this commit costs no network call, which is what
//! keeps repeated local runs cheap. Fetches for distinct
//! (component, target) pairs run in parallel; each one retries transient
//! store failures a bounded number of times.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use xz2::read::XzDecoder;

use crate::retry::RetryPolicy;
use crate::store::{ensure_present, FsStore, ObjectStore, PutOptions, StoreError};

/// One artifact the pipeline expects the CI store to have produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub component: String,
    pub target: String,
    pub file_name: String,
    /// Required artifacts abort the run when absent; optional ones are
    /// skipped with a warning
    pub required: bool,
}

impl ArtifactSpec {
    pub fn new(component: &str, target: &str, release_name: &str, required: bool) -> Self {
        Self {
            component: component.to_string(),
            target: target.to_string(),
            file_name: format!("{}-{}-{}.tar.xz", component, release_name, target),
            required,
        }
    }
}

/// An artifact staged on local disk, ready for transform and publish
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub component: String,
    pub target: String,
    pub file_name: String,
    pub path: PathBuf,
    pub required: bool,
}

/// Errors from artifact staging
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("required artifact {file} is missing from the artifact store")]
    MissingRequired { file: String },

    #[error("no artifacts staged for commit {commit}; is this branch awaiting a build?")]
    NoArtifacts { commit: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no embedded version file inside {file}")]
    MissingEmbeddedVersion { file: String },

    #[error("release version mismatch: resolved {resolved} but staged artifacts carry {embedded}")]
    VersionMismatch { resolved: String, embedded: String },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Store(e) if e.is_transient())
    }
}

/// Fetches artifacts from the upstream CI store into a local staging cache
pub struct ArtifactSource<'a> {
    upstream: &'a dyn ObjectStore,
    download_prefix: String,
    staging: FsStore,
    retry: RetryPolicy,
}

impl<'a> ArtifactSource<'a> {
    pub fn new(
        upstream: &'a dyn ObjectStore,
        download_prefix: &str,
        staging_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            upstream,
            download_prefix: download_prefix.trim_matches('/').to_string(),
            staging: FsStore::new(staging_root),
            retry,
        }
    }

    /// Stage every listed artifact for `commit`.
    ///
    /// All fetches share the one commit; a missing optional artifact is
    /// skipped with a warning, a missing required artifact aborts.
    pub fn stage_all(
        &self,
        commit: &str,
        specs: &[ArtifactSpec],
    ) -> Result<Vec<StagedArtifact>, SourceError> {
        let staged = specs
            .par_iter()
            .map(|spec| self.stage_one(commit, spec))
            .collect::<Result<Vec<_>, SourceError>>()?;

        let staged: Vec<StagedArtifact> = staged.into_iter().flatten().collect();
        if staged.is_empty() {
            return Err(SourceError::NoArtifacts {
                commit: commit.to_string(),
            });
        }
        Ok(staged)
    }

    fn stage_one(
        &self,
        commit: &str,
        spec: &ArtifactSpec,
    ) -> Result<Option<StagedArtifact>, SourceError> {
        let staging_key = format!("{}/{}", commit, spec.file_name);
        let upstream_key = format!("{}/{}/{}", self.download_prefix, commit, spec.file_name);

        let result = ensure_present(&self.staging, &staging_key, &PutOptions::default(), || {
            self.retry.run_where(
                &format!("fetch of {}", spec.file_name),
                || self.upstream.get(&upstream_key),
                StoreError::is_transient,
            )
        });

        match result {
            Ok(fetched) => {
                if fetched {
                    println!("[fetch] staged {}", spec.file_name);
                } else {
                    println!("[fetch] {} already staged, skipping fetch", spec.file_name);
                }
                Ok(Some(StagedArtifact {
                    component: spec.component.clone(),
                    target: spec.target.clone(),
                    file_name: spec.file_name.clone(),
                    path: self.staging.root().join(&staging_key),
                    required: spec.required,
                }))
            }
            Err(StoreError::NotFound { .. }) if spec.required => {
                Err(SourceError::MissingRequired {
                    file: spec.file_name.clone(),
                })
            }
            Err(StoreError::NotFound { .. }) => {
                eprintln!(
                    "[fetch] warning: optional artifact {} not in the artifact store, skipping",
                    spec.file_name
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Read the `version` file embedded in a staged `.tar.xz` artifact.
///
/// CI archives place a `version` file directly under the top-level
/// directory; its first whitespace-separated token is the version number.
pub fn embedded_release_version(artifact_path: &Path) -> Result<Option<String>, SourceError> {
    let file = File::open(artifact_path)?;
    let mut archive = tar::Archive::new(XzDecoder::new(BufReader::new(file)));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_version_file = {
            let path = entry.path()?;
            path.iter().nth(1) == Some(std::ffi::OsStr::new("version"))
        };
        if is_version_file {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(Some(contents.trim().to_string()));
        }
    }
    Ok(None)
}

/// Check that the version embedded in the authoritative artifact agrees
/// with the resolved release version.
pub fn cross_check_version(
    staged: &[StagedArtifact],
    authoritative_component: &str,
    required_target: &str,
    resolved_version: &str,
) -> Result<(), SourceError> {
    let artifact = match staged
        .iter()
        .find(|a| a.component == authoritative_component && a.target == required_target)
    {
        Some(artifact) => artifact,
        None => return Ok(()),
    };

    let embedded = embedded_release_version(&artifact.path)?.ok_or_else(|| {
        SourceError::MissingEmbeddedVersion {
            file: artifact.file_name.clone(),
        }
    })?;

    // The embedded file reads like `1.47.0 (18bf6b4f0 2020-10-07)`.
    let embedded_version = embedded.split_whitespace().next().unwrap_or_default();
    if embedded_version != resolved_version {
        return Err(SourceError::VersionMismatch {
            resolved: resolved_version.to_string(),
            embedded: embedded_version.to_string(),
        });
    }
    Ok(())
}
