//! dist-promote - release promotion pipeline
//!
//! Promotes a finished toolchain build from the internal CI artifact
//! store to the public distribution store: resolve the release commit and
//! version, stage and validate the build artifacts, recompress them for
//! distribution, build and sign the channel manifest, publish everything
//! in an order that keeps the release atomic for readers, then invalidate
//! the CDN in front of the store.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod github;
pub mod invalidate;
pub mod manifest;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod retry;
pub mod signer;
pub mod source;
pub mod state;
pub mod store;
pub mod transform;

pub use cancel::CancelToken;
pub use channel::Channel;
pub use config::{CliOverrides, Config};
pub use github::{GithubHost, MockHost, SourceHost};
pub use manifest::{ReleaseManifest, ReleaseMarker};
pub use pipeline::{ErrorClass, Pipeline, PipelineError, PipelineOutcome};
pub use signer::Signer;
pub use store::{FsStore, ObjectStore, S3Store, S3StoreConfig};
