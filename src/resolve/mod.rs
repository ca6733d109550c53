//! Version and commit resolution
//!
//! Turns a channel (plus an optional override) into the concrete commit
//! and version string the rest of the run is pinned to. Version lookup is
//! an ordered list of strategies tried until one yields a value; the
//! strategies differ per channel kind (rolling channels are named after
//! themselves, stable reads version metadata out of the source tree,
//! named tool channels read their package manifest).

use regex_lite::Regex;
use serde::Deserialize;

use crate::channel::Channel;
use crate::github::{HostError, SourceHost};

/// Canonical version metadata location in the toolchain source tree
const VERSION_FILE: &str = "src/version";

/// Legacy version metadata location, predating the canonical file
const LEGACY_CHANNEL_FILE: &str = "src/bootstrap/channel.rs";

/// Package manifest consulted for installer-only (named tool) releases
const TOOL_MANIFEST_FILE: &str = "Cargo.toml";

/// Outcome of resolution: the commit and version every later stage uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub commit: String,
    pub version: String,
}

/// Errors from version/commit resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("source host error: {0}")]
    Host(#[from] HostError),

    #[error("no version metadata found for {channel} at {commit}")]
    VersionNotFound { channel: String, commit: String },

    #[error("could not parse version metadata in {path} at {commit}")]
    Malformed { path: String, commit: String },

    #[error(
        "cannot derive the package manager version from {version}; \
         set an explicit derived-version override"
    )]
    DerivedVersion { version: String },
}

impl ResolveError {
    /// Whether the failure is worth retrying from the caller's side
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::Host(e) if e.is_transient())
    }
}

/// One way to find a version string at a commit
#[derive(Debug, Clone, PartialEq, Eq)]
enum VersionStrategy {
    /// The channel name is the version (rolling channels)
    ChannelName(String),
    /// Plain version file in the source tree
    VersionFile(&'static str),
    /// `CFG_RELEASE_NUM: "x.y.z"` in the legacy channel metadata
    LegacyChannelMetadata(&'static str),
    /// `package.version` from a tool's Cargo manifest
    PackageManifest(&'static str),
}

impl VersionStrategy {
    fn lookup(
        &self,
        host: &dyn SourceHost,
        commit: &str,
    ) -> Result<Option<String>, ResolveError> {
        match self {
            VersionStrategy::ChannelName(name) => Ok(Some(name.clone())),
            VersionStrategy::VersionFile(path) => {
                Ok(host.read_file(commit, path)?.map(|s| s.trim().to_string()))
            }
            VersionStrategy::LegacyChannelMetadata(path) => {
                match host.read_file(commit, path)? {
                    Some(contents) => parse_cfg_release_num(&contents)
                        .map(Some)
                        .ok_or_else(|| ResolveError::Malformed {
                            path: path.to_string(),
                            commit: commit.to_string(),
                        }),
                    None => Ok(None),
                }
            }
            VersionStrategy::PackageManifest(path) => {
                match host.read_file(commit, path)? {
                    Some(contents) => {
                        #[derive(Deserialize)]
                        struct Manifest {
                            package: Package,
                        }
                        #[derive(Deserialize)]
                        struct Package {
                            version: String,
                        }
                        let manifest: Manifest =
                            toml::from_str(&contents).map_err(|_| ResolveError::Malformed {
                                path: path.to_string(),
                                commit: commit.to_string(),
                            })?;
                        Ok(Some(manifest.package.version))
                    }
                    None => Ok(None),
                }
            }
        }
    }
}

/// Strategies for a channel, in the order they are tried
fn version_strategies(channel: &Channel) -> Vec<VersionStrategy> {
    match channel {
        Channel::Nightly | Channel::Beta => {
            vec![VersionStrategy::ChannelName(channel.to_string())]
        }
        Channel::Stable => vec![
            VersionStrategy::VersionFile(VERSION_FILE),
            VersionStrategy::LegacyChannelMetadata(LEGACY_CHANNEL_FILE),
        ],
        Channel::Named(name) => vec![
            VersionStrategy::PackageManifest(TOOL_MANIFEST_FILE),
            VersionStrategy::ChannelName(name.clone()),
        ],
    }
}

fn parse_cfg_release_num(contents: &str) -> Option<String> {
    let re = Regex::new(r#"CFG_RELEASE_NUM:\s*"([^"]+)""#).expect("valid regex");
    re.captures(contents)
        .map(|caps| caps[1].to_string())
}

/// Resolve the commit for a channel: the override verbatim, or the tip of
/// the channel's branch
pub fn resolve_commit(
    host: &dyn SourceHost,
    channel: &Channel,
    override_commit: Option<&str>,
) -> Result<String, ResolveError> {
    if let Some(commit) = override_commit {
        return Ok(commit.to_string());
    }
    Ok(host.branch_tip(channel.branch())?)
}

/// Resolve the version string for a channel at a commit
pub fn resolve_version(
    host: &dyn SourceHost,
    channel: &Channel,
    commit: &str,
) -> Result<String, ResolveError> {
    for strategy in version_strategies(channel) {
        if let Some(version) = strategy.lookup(host, commit)? {
            return Ok(version);
        }
    }
    Err(ResolveError::VersionNotFound {
        channel: channel.to_string(),
        commit: commit.to_string(),
    })
}

/// Resolve both commit and version
pub fn resolve(
    host: &dyn SourceHost,
    channel: &Channel,
    override_commit: Option<&str>,
) -> Result<ResolvedRelease, ResolveError> {
    let commit = resolve_commit(host, channel, override_commit)?;
    let version = resolve_version(host, channel, &commit)?;
    Ok(ResolvedRelease { commit, version })
}

/// Known primary → derived versions where the lockstep numbering below did
/// not hold. Entries here win over the computed mapping.
const DERIVED_VERSION_EXCEPTIONS: &[(&str, &str)] = &[];

/// Derive the bundled package manager's version from the primary version.
///
/// The package manager is not published independently on numbered
/// channels, so its version is reconstructed as `1.x.y` → `0.(x+1).y`.
/// The mapping only holds for the `1.x` numbering scheme; anything else
/// requires the configured override. Do not generalize this: it encodes a
/// historical numbering convention, not an algorithm.
pub fn derived_cargo_version(
    version: &str,
    override_version: Option<&str>,
) -> Result<String, ResolveError> {
    if let Some(explicit) = override_version {
        return Ok(explicit.to_string());
    }

    if let Some((_, derived)) = DERIVED_VERSION_EXCEPTIONS
        .iter()
        .find(|(primary, _)| *primary == version)
    {
        return Ok(derived.to_string());
    }

    let mut parts = version.splitn(3, '.');
    let (major, minor, rest) = (parts.next(), parts.next(), parts.next());
    match (major, minor, rest) {
        (Some("1"), Some(minor), Some(rest)) => {
            let minor: u64 = minor.parse().map_err(|_| ResolveError::DerivedVersion {
                version: version.to_string(),
            })?;
            Ok(format!("0.{}.{}", minor + 1, rest))
        }
        _ => Err(ResolveError::DerivedVersion {
            version: version.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockHost;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_override_commit_used_verbatim() {
        let host = MockHost::new();
        let commit = resolve_commit(&host, &Channel::Nightly, Some(COMMIT)).unwrap();
        assert_eq!(commit, COMMIT);
    }

    #[test]
    fn test_commit_from_branch_tip() {
        let host = MockHost::new().with_branch("master", COMMIT);
        let commit = resolve_commit(&host, &Channel::Nightly, None).unwrap();
        assert_eq!(commit, COMMIT);
    }

    #[test]
    fn test_missing_branch_is_an_error() {
        let host = MockHost::new();
        assert!(resolve_commit(&host, &Channel::Beta, None).is_err());
    }

    #[test]
    fn test_rolling_channel_version_is_channel_name() {
        let host = MockHost::new();
        assert_eq!(
            resolve_version(&host, &Channel::Nightly, COMMIT).unwrap(),
            "nightly"
        );
        assert_eq!(
            resolve_version(&host, &Channel::Beta, COMMIT).unwrap(),
            "beta"
        );
    }

    #[test]
    fn test_stable_version_from_canonical_file() {
        let host = MockHost::new().with_file(COMMIT, "src/version", "1.47.0\n");
        assert_eq!(
            resolve_version(&host, &Channel::Stable, COMMIT).unwrap(),
            "1.47.0"
        );
    }

    #[test]
    fn test_stable_version_falls_back_to_legacy_location() {
        let host = MockHost::new().with_file(
            COMMIT,
            "src/bootstrap/channel.rs",
            r#"
            pub const CFG_RELEASE_NUM: &str = "1.47.0";
            "#,
        );
        assert_eq!(
            resolve_version(&host, &Channel::Stable, COMMIT).unwrap(),
            "1.47.0"
        );
    }

    #[test]
    fn test_stable_version_missing_everywhere_is_fatal() {
        let host = MockHost::new();
        let err = resolve_version(&host, &Channel::Stable, COMMIT).unwrap_err();
        assert!(matches!(err, ResolveError::VersionNotFound { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_legacy_file_without_release_num_is_malformed() {
        let host = MockHost::new().with_file(COMMIT, "src/bootstrap/channel.rs", "// nothing");
        let err = resolve_version(&host, &Channel::Stable, COMMIT).unwrap_err();
        assert!(matches!(err, ResolveError::Malformed { .. }));
    }

    #[test]
    fn test_named_channel_reads_package_manifest() {
        let host = MockHost::new().with_file(
            COMMIT,
            "Cargo.toml",
            "[package]\nname = \"rustup\"\nversion = \"1.25.2\"\n",
        );
        let channel = Channel::Named("rustup".to_string());
        assert_eq!(resolve_version(&host, &channel, COMMIT).unwrap(), "1.25.2");
    }

    #[test]
    fn test_named_channel_falls_back_to_channel_name() {
        let host = MockHost::new();
        let channel = Channel::Named("rustup".to_string());
        assert_eq!(resolve_version(&host, &channel, COMMIT).unwrap(), "rustup");
    }

    #[test]
    fn test_parse_cfg_release_num() {
        let contents = r#"CFG_RELEASE_NUM: "1.47.0""#;
        assert_eq!(parse_cfg_release_num(contents), Some("1.47.0".to_string()));
        assert_eq!(parse_cfg_release_num("no version here"), None);
    }

    #[test]
    fn test_derived_cargo_version() {
        assert_eq!(derived_cargo_version("1.47.0", None).unwrap(), "0.48.0");
        assert_eq!(derived_cargo_version("1.47.2", None).unwrap(), "0.48.2");
    }

    #[test]
    fn test_derived_cargo_version_override_wins() {
        assert_eq!(
            derived_cargo_version("1.47.0", Some("0.50.0")).unwrap(),
            "0.50.0"
        );
    }

    #[test]
    fn test_derived_cargo_version_rejects_other_schemes() {
        assert!(derived_cargo_version("2.0.0", None).is_err());
        assert!(derived_cargo_version("nightly", None).is_err());
    }
}
