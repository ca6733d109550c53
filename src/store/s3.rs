//! `aws` CLI-backed object store
//!
//! Production buckets are driven through the `aws` CLI as a subprocess,
//! which keeps credential handling in the surrounding environment and lets
//! an `--endpoint-url` override point the same code at a non-AWS stand-in.
//! Every invocation carries connect/read timeouts so no call blocks
//! indefinitely.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

use super::{ObjectStore, PutOptions, StoreError};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    /// Bucket name
    pub bucket: String,

    /// Endpoint override for non-AWS backends (None for AWS proper)
    pub endpoint_url: Option<String>,

    /// `--cli-connect-timeout`, in seconds
    pub connect_timeout_secs: u64,

    /// `--cli-read-timeout`, in seconds
    pub read_timeout_secs: u64,
}

/// Object store backed by `aws s3` / `aws s3api`
pub struct S3Store {
    config: S3StoreConfig,
}

impl S3Store {
    pub fn new(config: S3StoreConfig) -> Self {
        Self { config }
    }

    /// `s3://bucket/key` URL for an object
    fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }

    fn aws(&self) -> Command {
        let mut cmd = Command::new("aws");
        if let Some(url) = &self.config.endpoint_url {
            cmd.arg("--endpoint-url").arg(url);
        }
        cmd.arg("--cli-connect-timeout")
            .arg(self.config.connect_timeout_secs.to_string())
            .arg("--cli-read-timeout")
            .arg(self.config.read_timeout_secs.to_string());
        cmd
    }

    /// Arguments appended to `aws s3 cp` for an upload
    fn put_args(options: &PutOptions) -> Vec<String> {
        let mut args = vec!["--only-show-errors".to_string()];
        if let Some(class) = &options.storage_class {
            args.push("--storage-class".to_string());
            args.push(class.clone());
        }
        if let Some(cache) = &options.cache_control {
            args.push("--cache-control".to_string());
            args.push(cache.clone());
        }
        args
    }
}

fn run(cmd: &mut Command) -> Result<std::process::Output, StoreError> {
    let output = cmd.output()?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(StoreError::Command(format!(
            "{:?} exited with {}: {}",
            cmd,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl ObjectStore for S3Store {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let output = self
            .aws()
            .arg("s3api")
            .arg("head-object")
            .arg("--bucket")
            .arg(&self.config.bucket)
            .arg("--key")
            .arg(key)
            .output()?;

        if output.status.success() {
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("404") || stderr.contains("Not Found") {
            Ok(false)
        } else {
            Err(StoreError::Command(format!(
                "head-object on {} failed: {}",
                self.object_url(key),
                stderr.trim()
            )))
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let dest = NamedTempFile::new()?;
        let result = run(self
            .aws()
            .arg("s3")
            .arg("cp")
            .arg("--only-show-errors")
            .arg(self.object_url(key))
            .arg(dest.path()));

        match result {
            Ok(_) => Ok(std::fs::read(dest.path())?),
            Err(StoreError::Command(msg)) if msg.contains("404") || msg.contains("does not exist") => {
                Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn put(&self, key: &str, bytes: &[u8], options: &PutOptions) -> Result<(), StoreError> {
        let mut src = NamedTempFile::new()?;
        src.write_all(bytes)?;
        src.flush()?;

        run(self
            .aws()
            .arg("s3")
            .arg("cp")
            .args(Self::put_args(options))
            .arg(src.path())
            .arg(self.object_url(key)))?;
        Ok(())
    }
}
