//! Pipeline orchestration
//!
//! Sequences one promotion run: resolve the release, consult the channel
//! marker, stage artifacts, transform them, build and sign the manifest,
//! publish, invalidate the CDN. Every stage failure is classified
//! (configuration, transient, data, publish, cancelled) so the caller can
//! decide retry-vs-fix without string matching, and maps to a distinct
//! exit code. The pipeline never retries itself as a whole: re-running the
//! binary is always safe because of the marker check and the
//! ensure-present uploads.

use std::fs;

use chrono::Utc;

use crate::cancel::CancelToken;
use crate::config::{Config, ConfigError};
use crate::github::SourceHost;
use crate::invalidate::{invalidation_paths, CacheInvalidator, FastlyConfig};
use crate::manifest::{ManifestError, ReleaseManifest, ReleaseMarker};
use crate::publish::{PublishError, PublishRecord, Publisher};
use crate::resolve::{self, ResolveError};
use crate::signer::{SignError, Signer};
use crate::source::{self, ArtifactSource, ArtifactSpec, SourceError};
use crate::state::{PromoteState, StateError, StateTracker};
use crate::store::{ObjectStore, StoreError};
use crate::transform::{self, TransformError, TransformOptions};

/// Failure classification driving exit codes and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or missing configuration; fix and re-run
    Config,
    /// External service trouble; re-running is expected to succeed
    Transient,
    /// The release inputs are wrong (missing required artifact, bad
    /// version metadata, checksum trouble); no publish write happened
    Data,
    /// A public-store write failed mid-sequence; the previous release
    /// marker is still the visible one
    Publish,
    /// The run was interrupted
    Cancelled,
}

impl ErrorClass {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Config => 1,
            ErrorClass::Transient => 10,
            ErrorClass::Data => 20,
            ErrorClass::Publish => 30,
            ErrorClass::Cancelled => 80,
        }
    }
}

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("version resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("marker check failed: {0}")]
    Marker(#[source] ManifestError),

    #[error("artifact staging failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("manifest error: {0}")]
    Manifest(#[source] ManifestError),

    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("pipeline state error: {0}")]
    State(#[from] StateError),

    #[error("run cancelled")]
    Cancelled,

    #[error("no release published for {channel} yet")]
    NoPublishedRelease { channel: String },
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Config(_) => ErrorClass::Config,
            PipelineError::Resolve(err) => match err {
                ResolveError::Host(host) if host.is_transient() => ErrorClass::Transient,
                ResolveError::DerivedVersion { .. } => ErrorClass::Config,
                _ => ErrorClass::Data,
            },
            PipelineError::Marker(err) => match err {
                ManifestError::Store(store) if store.is_transient() => ErrorClass::Transient,
                _ => ErrorClass::Data,
            },
            PipelineError::Fetch(err) if err.is_transient() => ErrorClass::Transient,
            PipelineError::Fetch(_) => ErrorClass::Data,
            PipelineError::Transform(_) => ErrorClass::Data,
            PipelineError::Manifest(_) => ErrorClass::Data,
            PipelineError::Sign(_) => ErrorClass::Config,
            PipelineError::Publish(PublishError::Cancelled) => ErrorClass::Cancelled,
            PipelineError::Publish(_) => ErrorClass::Publish,
            PipelineError::State(_) => ErrorClass::Data,
            PipelineError::Cancelled => ErrorClass::Cancelled,
            PipelineError::NoPublishedRelease { .. } => ErrorClass::Data,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}

/// Successful run outcomes; both exit with code 0
#[derive(Debug)]
pub enum PipelineOutcome {
    Published {
        commit: String,
        version: String,
        record: PublishRecord,
    },
    /// The marker already recorded this release; zero writes happened
    ShortCircuit { commit: String, version: String },
}

/// Result of a `plan` invocation: what a run would do, with no writes
#[derive(Debug)]
pub struct PlanOutcome {
    pub commit: String,
    pub version: String,
    pub already_published: bool,
}

/// One promotion run
pub struct Pipeline<'a> {
    config: &'a Config,
    host: &'a dyn SourceHost,
    upstream: &'a dyn ObjectStore,
    public: &'a dyn ObjectStore,
    cancel: CancelToken,
    date: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        host: &'a dyn SourceHost,
        upstream: &'a dyn ObjectStore,
        public: &'a dyn ObjectStore,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            host,
            upstream,
            public,
            cancel,
            date: Utc::now().format("%Y-%m-%d").to_string(),
        }
    }

    /// Pin the release date (deterministic runs and tests)
    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    /// Resolve and check the marker without writing anything
    pub fn plan(&self) -> Result<PlanOutcome, PipelineError> {
        let release = resolve::resolve(
            self.host,
            &self.config.channel,
            self.config.override_commit.as_deref(),
        )?;
        let marker =
            ReleaseMarker::load(self.public, &self.config.upload_prefix, &self.channel_name())
                .map_err(PipelineError::Marker)?;
        let already_published = marker
            .map(|m| m.matches(&release.commit, &release.version))
            .unwrap_or(false);

        Ok(PlanOutcome {
            commit: release.commit,
            version: release.version,
            already_published,
        })
    }

    /// Execute the full promotion
    pub fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        let mut tracker = StateTracker::new();
        let result = self.execute(&mut tracker);
        if result.is_err() && !tracker.state().is_terminal() {
            let _ = tracker.advance(PromoteState::Failed);
        }
        result
    }

    /// Re-download the published release and verify it against its
    /// manifest; returns one description per problem found
    pub fn verify(&self) -> Result<Vec<String>, PipelineError> {
        let channel = self.channel_name();
        let key = format!(
            "{}/{}",
            self.config.upload_prefix,
            ReleaseManifest::file_name(&channel)
        );
        let bytes = match self.public.get(&key) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                return Err(PipelineError::NoPublishedRelease { channel })
            }
            Err(err) => return Err(PipelineError::Manifest(err.into())),
        };
        let manifest: ReleaseManifest =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::Manifest(e.into()))?;
        manifest
            .verify_published(self.public)
            .map_err(PipelineError::Manifest)
    }

    fn execute(&self, tracker: &mut StateTracker) -> Result<PipelineOutcome, PipelineError> {
        let channel = self.channel_name();

        println!("[resolve] resolving the {} release", channel);
        let release = resolve::resolve(
            self.host,
            &self.config.channel,
            self.config.override_commit.as_deref(),
        )?;
        println!(
            "[resolve] {} rev is {} (version {})",
            channel, release.commit, release.version
        );

        self.check_cancel()?;
        tracker.advance(PromoteState::CheckingMarker)?;
        if self.config.bypass_marker_check {
            println!("[marker] marker check bypassed by configuration");
        } else if let Some(marker) =
            ReleaseMarker::load(self.public, &self.config.upload_prefix, &channel)
                .map_err(PipelineError::Marker)?
        {
            if marker.matches(&release.commit, &release.version) {
                tracker.advance(PromoteState::ShortCircuit)?;
                println!(
                    "[marker] {} {} at {} is already published, nothing to do",
                    channel, release.version, release.commit
                );
                return Ok(PipelineOutcome::ShortCircuit {
                    commit: release.commit,
                    version: release.version,
                });
            }
            println!(
                "[marker] last published commit for {} is {}, proceeding",
                channel, marker.commit
            );
        } else {
            println!("[marker] no previous release recorded for {}", channel);
        }

        self.check_cancel()?;
        tracker.advance(PromoteState::Fetching)?;
        let specs = self.artifact_specs(&release.version)?;
        println!(
            "[fetch] staging up to {} artifacts for commit {}",
            specs.len(),
            release.commit
        );
        let artifact_source = ArtifactSource::new(
            self.upstream,
            &self.config.download_prefix,
            self.config.staging_dir(),
            self.config.retry_policy(),
        );
        let staged = artifact_source.stage_all(&release.commit, &specs)?;
        println!("[fetch] {} artifacts staged", staged.len());

        if self.config.channel.is_numbered() {
            source::cross_check_version(
                &staged,
                &self.config.authoritative_component,
                &self.config.required_target,
                &release.version,
            )?;
            println!(
                "[fetch] staged artifacts agree on version {}",
                release.version
            );
        }

        self.check_cancel()?;
        tracker.advance(PromoteState::Transforming)?;
        let staged = transform::recompress_all(staged, self.transform_options())?;

        self.check_cancel()?;
        tracker.advance(PromoteState::BuildingManifest)?;
        let manifest = ReleaseManifest::build(
            &channel,
            &release.version,
            &release.commit,
            &self.date,
            &self.config.upload_prefix,
            &staged,
        )
        .map_err(PipelineError::Manifest)?;
        println!(
            "[manifest] {} targets, {} files",
            manifest.targets.len(),
            manifest.file_count()
        );

        tracker.advance(PromoteState::Signing)?;
        let signer = Signer::from_files(
            &self.config.key_path,
            self.config.passphrase_path.as_deref(),
        )?;
        let signature = signer.sign(&manifest.canonical_bytes().map_err(PipelineError::Manifest)?);
        println!(
            "[sign] manifest signed, key fingerprint {}",
            &signature.pubkey_fingerprint[..16]
        );

        self.check_cancel()?;
        tracker.advance(PromoteState::Publishing)?;
        let marker = ReleaseMarker::new(&channel, &release.commit, &release.version);
        let publisher = Publisher::new(
            self.public,
            &self.config.upload_prefix,
            &self.date,
            self.config.put_options(),
            self.cancel.clone(),
        );
        let record = publisher.publish(&staged, &manifest, &signature, &marker)?;
        println!(
            "[publish] wrote {} objects ({} already present from an earlier attempt)",
            record.written.len(),
            record.skipped
        );

        tracker.advance(PromoteState::Invalidating)?;
        let invalidator = CacheInvalidator {
            skip: self.config.skip_invalidations,
            cloudfront_distributions: &self.config.cloudfront_distributions,
            fastly: match (&self.config.fastly_service_id, &self.config.fastly_api_token) {
                (Some(service_id), Some(api_token)) => Some(FastlyConfig {
                    service_id: service_id.clone(),
                    api_token: api_token.clone(),
                }),
                _ => None,
            },
            work_dir: &self.config.work_dir,
            http_timeout: self.config.http_timeout(),
            retry: self.config.retry_policy(),
        };
        invalidator.run(&invalidation_paths(&self.config.upload_prefix, &channel));

        tracker.advance(PromoteState::Done)?;
        self.cleanup();
        println!(
            "[done] {} {} promoted at commit {}",
            channel, release.version, release.commit
        );

        Ok(PipelineOutcome::Published {
            commit: release.commit,
            version: release.version,
            record,
        })
    }

    /// The expected artifact matrix for this run.
    ///
    /// Components whose version is derived (the bundled package manager on
    /// numbered channels) get their file names from the derived version;
    /// everything else uses the channel release name.
    fn artifact_specs(&self, version: &str) -> Result<Vec<ArtifactSpec>, PipelineError> {
        let release_name = self.config.channel.release_name(version);
        let mut specs = Vec::new();

        for target in &self.config.targets {
            for component in &self.config.components {
                let file_version = if self.config.channel.is_numbered()
                    && self.config.derived_version_components.contains(component)
                {
                    resolve::derived_cargo_version(
                        version,
                        self.config.derived_version_override.as_deref(),
                    )?
                } else {
                    release_name.to_string()
                };

                let required = target == &self.config.required_target
                    && self.config.required_components.contains(component);
                specs.push(ArtifactSpec::new(component, target, &file_version, required));
            }
        }
        Ok(specs)
    }

    fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            recompress_gz: self.config.recompress_gz,
            recompress_xz: self.config.recompress_xz,
            gzip_level: self.config.gzip_level,
            xz_preset: self.config.xz_preset,
        }
    }

    fn channel_name(&self) -> String {
        self.config.channel.to_string()
    }

    fn check_cancel(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn cleanup(&self) {
        if self.config.skip_cleanup {
            println!(
                "[done] keeping staging directory {} (cleanup skipped)",
                self.config.staging_dir().display()
            );
        } else {
            let _ = fs::remove_dir_all(self.config.staging_dir());
        }
    }
}
