//! Pipeline configuration
//!
//! One validated `Config` is built at startup from the TOML file plus CLI
//! overrides and passed by reference into every component; nothing reads
//! ambient process state after this point. Validation happens once, so a
//! malformed configuration fails before any network call or store write.

mod defaults;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{Channel, InvalidChannel};
use crate::retry::RetryPolicy;
use crate::store::PutOptions;

/// Errors from configuration loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no channel given (set it in the configuration file or on the command line)")]
    MissingChannel,

    #[error(transparent)]
    Channel(#[from] InvalidChannel),

    #[error("signing key path is not set")]
    MissingKeyPath,

    #[error("required target {0} is not in the target list")]
    RequiredTargetNotListed(String),

    #[error("required component {0} is not in the component list")]
    RequiredComponentNotListed(String),

    #[error("{field} must be {constraint}")]
    OutOfRange {
        field: &'static str,
        constraint: &'static str,
    },
}

/// The validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub channel: Channel,
    pub override_commit: Option<String>,

    pub repository: String,
    pub github_token: Option<String>,

    pub download_bucket: String,
    pub download_prefix: String,
    pub upload_bucket: String,
    pub upload_prefix: String,
    pub storage_class: String,
    pub cache_control: Option<String>,
    pub endpoint_url: Option<String>,

    pub targets: Vec<String>,
    pub required_target: String,
    pub components: Vec<String>,
    pub required_components: Vec<String>,
    /// Component whose archive carries the embedded version file
    pub authoritative_component: String,
    /// Components whose version is derived from the primary version on
    /// numbered channels
    pub derived_version_components: Vec<String>,
    pub derived_version_override: Option<String>,

    pub recompress_gz: bool,
    pub recompress_xz: bool,
    pub gzip_level: u32,
    pub xz_preset: u32,

    pub key_path: PathBuf,
    pub passphrase_path: Option<PathBuf>,

    pub cloudfront_distributions: Vec<String>,
    pub fastly_service_id: Option<String>,
    pub fastly_api_token: Option<String>,

    pub work_dir: PathBuf,
    pub num_threads: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub http_timeout_secs: u64,

    pub bypass_marker_check: bool,
    pub skip_invalidations: bool,
    pub skip_cleanup: bool,
}

/// Flags and values the CLI can override on top of the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub channel: Option<String>,
    pub override_commit: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub endpoint_url: Option<String>,
    pub bypass_marker_check: bool,
    pub skip_invalidations: bool,
    pub skip_cleanup: bool,
}

impl Config {
    /// Load and validate the configuration file, applying CLI overrides
    pub fn load(path: &Path, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents)?;
        Self::from_parts(file, overrides)
    }

    fn from_parts(file: FileConfig, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let channel_name = overrides
            .channel
            .or(file.channel)
            .ok_or(ConfigError::MissingChannel)?;

        let config = Self {
            channel: channel_name.parse()?,
            override_commit: overrides.override_commit.or(file.run.override_commit),
            repository: file.repository,
            github_token: file.github_token,
            download_bucket: file.source.bucket,
            download_prefix: file.source.prefix,
            upload_bucket: file.destination.bucket,
            upload_prefix: file.destination.prefix,
            storage_class: file.destination.storage_class,
            cache_control: file.destination.cache_control,
            endpoint_url: overrides.endpoint_url.or(file.destination.endpoint_url),
            targets: file.artifacts.targets,
            required_target: file.artifacts.required_target,
            components: file.artifacts.components,
            required_components: file.artifacts.required_components,
            authoritative_component: file.artifacts.authoritative_component,
            derived_version_components: file.artifacts.derived_version_components,
            derived_version_override: file.run.derived_version_override,
            recompress_gz: file.recompress.gz,
            recompress_xz: file.recompress.xz,
            gzip_level: file.recompress.gzip_level,
            xz_preset: file.recompress.xz_preset,
            key_path: file.signing.key_path.ok_or(ConfigError::MissingKeyPath)?,
            passphrase_path: file.signing.passphrase_path,
            cloudfront_distributions: file.cdn.cloudfront_distributions,
            fastly_service_id: file.cdn.fastly_service_id,
            fastly_api_token: file.cdn.fastly_api_token,
            work_dir: overrides.work_dir.unwrap_or(file.run.work_dir),
            num_threads: file.run.num_threads,
            retry_attempts: file.run.retry_attempts,
            retry_base_delay_ms: file.run.retry_base_delay_ms,
            http_timeout_secs: file.run.http_timeout_secs,
            bypass_marker_check: overrides.bypass_marker_check || file.run.bypass_marker_check,
            skip_invalidations: overrides.skip_invalidations || file.run.skip_invalidations,
            skip_cleanup: overrides.skip_cleanup || file.run.skip_cleanup,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.targets.contains(&self.required_target) {
            return Err(ConfigError::RequiredTargetNotListed(
                self.required_target.clone(),
            ));
        }
        for component in &self.required_components {
            if !self.components.contains(component) {
                return Err(ConfigError::RequiredComponentNotListed(component.clone()));
            }
        }
        if !(1..=9).contains(&self.gzip_level) {
            return Err(ConfigError::OutOfRange {
                field: "recompress.gzip_level",
                constraint: "between 1 and 9",
            });
        }
        if self.xz_preset > 9 {
            return Err(ConfigError::OutOfRange {
                field: "recompress.xz_preset",
                constraint: "between 0 and 9",
            });
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                field: "run.retry_attempts",
                constraint: "at least 1",
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "run.http_timeout_secs",
                constraint: "at least 1",
            });
        }
        Ok(())
    }

    /// Local staging directory for fetched artifacts, keyed by commit
    /// below this root
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Write metadata applied to public-store objects
    pub fn put_options(&self) -> PutOptions {
        PutOptions {
            storage_class: Some(self.storage_class.clone()),
            cache_control: self.cache_control.clone(),
        }
    }
}

/// On-disk configuration layout
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    channel: Option<String>,
    #[serde(default = "defaults::repository")]
    repository: String,
    github_token: Option<String>,
    source: SourceSection,
    destination: DestinationSection,
    #[serde(default)]
    artifacts: ArtifactsSection,
    #[serde(default)]
    recompress: RecompressSection,
    #[serde(default)]
    signing: SigningSection,
    #[serde(default)]
    cdn: CdnSection,
    #[serde(default)]
    run: RunSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSection {
    bucket: String,
    #[serde(default = "defaults::download_prefix")]
    prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationSection {
    bucket: String,
    #[serde(default = "defaults::upload_prefix")]
    prefix: String,
    #[serde(default = "defaults::storage_class")]
    storage_class: String,
    #[serde(default = "defaults::cache_control")]
    cache_control: Option<String>,
    #[serde(default)]
    endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct ArtifactsSection {
    targets: Vec<String>,
    required_target: String,
    components: Vec<String>,
    required_components: Vec<String>,
    authoritative_component: String,
    derived_version_components: Vec<String>,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            targets: defaults::targets(),
            required_target: defaults::required_target(),
            components: defaults::components(),
            required_components: defaults::required_components(),
            authoritative_component: defaults::authoritative_component(),
            derived_version_components: defaults::derived_version_components(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RecompressSection {
    gz: bool,
    xz: bool,
    gzip_level: u32,
    xz_preset: u32,
}

impl Default for RecompressSection {
    fn default() -> Self {
        Self {
            gz: false,
            xz: false,
            gzip_level: defaults::gzip_level(),
            xz_preset: defaults::xz_preset(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct SigningSection {
    key_path: Option<PathBuf>,
    passphrase_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct CdnSection {
    cloudfront_distributions: Vec<String>,
    fastly_service_id: Option<String>,
    fastly_api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RunSection {
    override_commit: Option<String>,
    derived_version_override: Option<String>,
    work_dir: PathBuf,
    num_threads: usize,
    retry_attempts: u32,
    retry_base_delay_ms: u64,
    http_timeout_secs: u64,
    bypass_marker_check: bool,
    skip_invalidations: bool,
    skip_cleanup: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            override_commit: None,
            derived_version_override: None,
            work_dir: defaults::work_dir(),
            num_threads: 0,
            retry_attempts: defaults::retry_attempts(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
            http_timeout_secs: defaults::http_timeout_secs(),
            bypass_marker_check: false,
            skip_invalidations: false,
            skip_cleanup: false,
        }
    }
}
