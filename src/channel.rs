//! Release channels and their branch mapping
//!
//! A channel is the release track being promoted. The rolling channel
//! (`nightly`) tracks the default branch; `beta` and `stable` track their
//! own branches; any other name is a named tool channel tracking a branch
//! of the same name (used for installer-only releases).

use std::fmt;
use std::str::FromStr;

/// A release channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Nightly,
    Beta,
    Stable,
    /// A named tool channel (e.g. an installer released from its own branch)
    Named(String),
}

/// Error for unusable channel names
#[derive(Debug, thiserror::Error)]
#[error("invalid channel name: {0:?}")]
pub struct InvalidChannel(pub String);

impl Channel {
    /// The source-control branch this channel is released from
    pub fn branch(&self) -> &str {
        match self {
            Channel::Nightly => "master",
            Channel::Beta => "beta",
            Channel::Stable => "stable",
            Channel::Named(name) => name,
        }
    }

    /// Whether version metadata must be resolved from the source tree
    pub fn is_numbered(&self) -> bool {
        matches!(self, Channel::Stable)
    }

    /// The version segment used in artifact file names
    ///
    /// Nightly and beta archives carry the channel name; stable and named
    /// tool channels carry the resolved version number.
    pub fn release_name<'a>(&self, version: &'a str) -> &'a str {
        match self {
            Channel::Nightly => "nightly",
            Channel::Beta => "beta",
            Channel::Stable | Channel::Named(_) => version,
        }
    }
}

impl FromStr for Channel {
    type Err = InvalidChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(InvalidChannel(s.to_string()));
        }
        Ok(match s {
            "nightly" => Channel::Nightly,
            "beta" => Channel::Beta,
            "stable" => Channel::Stable,
            other => Channel::Named(other.to_string()),
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Nightly => write!(f, "nightly"),
            Channel::Beta => write!(f, "beta"),
            Channel::Stable => write!(f, "stable"),
            Channel::Named(name) => write!(f, "{}", name),
        }
    }
}
