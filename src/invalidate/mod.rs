//! CDN cache invalidation
//!
//! After a successful publish, the paths serving the channel manifest and
//! the top-level "latest" artifact copies are purged from the CDN layer.
//! The objects underneath are already correct and durable, so failure
//! here is a logged warning, never a rollback: stale caches heal on their
//! own.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Errors from a single invalidation request
#[derive(Debug, thiserror::Error)]
pub enum InvalidateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("create-invalidation failed for distribution {distribution}: {stderr}")]
    CloudFront {
        distribution: String,
        stderr: String,
    },

    #[error("purge of {url} failed: {reason}")]
    Fastly { url: String, reason: String },
}

/// Fastly service credentials
#[derive(Debug, Clone)]
pub struct FastlyConfig {
    pub service_id: String,
    pub api_token: String,
}

/// Requests CDN invalidation of published paths
pub struct CacheInvalidator<'a> {
    /// Skip the whole step (local runs have no CDN in front of them)
    pub skip: bool,

    /// CloudFront distribution ids to invalidate
    pub cloudfront_distributions: &'a [String],

    /// Fastly purge credentials, if the integration is configured
    pub fastly: Option<FastlyConfig>,

    /// Scratch directory for the invalidation payload file
    pub work_dir: &'a Path,

    /// Timeout for purge requests
    pub http_timeout: Duration,

    pub retry: RetryPolicy,
}

impl CacheInvalidator<'_> {
    /// Invalidate `paths` on every configured CDN layer.
    ///
    /// Never fails the run: every error is reported as a warning.
    pub fn run(&self, paths: &[String]) {
        if self.skip {
            eprintln!(
                "[invalidate] warning: skipped CDN invalidation of {:?} (disabled by configuration)",
                paths
            );
            return;
        }

        for distribution in self.cloudfront_distributions {
            if let Err(err) = self.invalidate_cloudfront(distribution, paths) {
                eprintln!(
                    "[invalidate] warning: CloudFront invalidation failed, caches may serve stale data: {}",
                    err
                );
            }
        }

        if let Some(fastly) = &self.fastly {
            for path in paths {
                if let Err(err) = self.purge_fastly(fastly, path) {
                    eprintln!(
                        "[invalidate] warning: Fastly purge failed, caches may serve stale data: {}",
                        err
                    );
                }
            }
        }
    }

    fn invalidate_cloudfront(
        &self,
        distribution: &str,
        paths: &[String],
    ) -> Result<(), InvalidateError> {
        let payload = serde_json::json!({
            "Paths": {
                "Items": paths,
                "Quantity": paths.len(),
            },
            "CallerReference": format!("dist-promote-{}", Uuid::new_v4()),
        });
        let payload_path = self.work_dir.join("invalidation-payload.json");
        std::fs::write(&payload_path, serde_json::to_vec(&payload)?)?;

        println!(
            "[invalidate] requesting CloudFront invalidation of {:?} on {}",
            paths, distribution
        );

        let output = Command::new("aws")
            .arg("cloudfront")
            .arg("create-invalidation")
            .arg("--distribution-id")
            .arg(distribution)
            .arg("--invalidation-batch")
            .arg(format!("file://{}", payload_path.display()))
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            Err(InvalidateError::CloudFront {
                distribution: distribution.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn purge_fastly(&self, fastly: &FastlyConfig, path: &str) -> Result<(), InvalidateError> {
        let url = format!(
            "https://api.fastly.com/purge/{}{}",
            fastly.service_id, path
        );
        println!("[invalidate] purging Fastly cache with POST {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.http_timeout)
            .user_agent("dist-promote")
            .build()
            .map_err(|e| InvalidateError::Fastly {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        self.retry.run(&format!("Fastly purge of {}", path), || {
            let response = client
                .post(&url)
                .header("Fastly-Key", &fastly.api_token)
                .header("Content-Type", "application/json")
                .send()
                .map_err(|e| InvalidateError::Fastly {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(InvalidateError::Fastly {
                    url: url.clone(),
                    reason: format!("status {}", response.status()),
                })
            }
        })
    }
}

/// CDN paths to purge for a channel: the channel manifest plus the
/// top-level latest copies the installer resolves.
pub fn invalidation_paths(upload_prefix: &str, channel: &str) -> Vec<String> {
    vec![
        format!("/{}/channel-{}*", upload_prefix, channel),
        format!("/{}/*", upload_prefix),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_paths() {
        let paths = invalidation_paths("dist", "nightly");
        assert_eq!(paths[0], "/dist/channel-nightly*");
        assert_eq!(paths[1], "/dist/*");
    }

    #[test]
    fn test_skip_performs_no_work() {
        let invalidator = CacheInvalidator {
            skip: true,
            cloudfront_distributions: &["DIST123".to_string()],
            fastly: None,
            work_dir: Path::new("/nonexistent"),
            http_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        };

        // Must not touch the filesystem or the network.
        invalidator.run(&["/dist/*".to_string()]);
    }
}
