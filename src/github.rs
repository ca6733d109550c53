//! Source-host client
//!
//! The upstream source-control host is read-only from the pipeline's point
//! of view: resolve a branch tip to a commit hash, and read a file's
//! contents at a commit. `GithubHost` implements this over the GitHub REST
//! API; `MockHost` is the in-memory implementation used by the test suite.

use std::collections::HashMap;

use base64::Engine;

use crate::retry::RetryPolicy;

/// Errors from source-host operations
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("missing ref {git_ref} in {repository}")]
    MissingRef {
        repository: String,
        git_ref: String,
    },

    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl HostError {
    /// Whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            HostError::Request { .. } => true,
            HostError::Status { status, .. } => *status == 429 || *status >= 500,
            HostError::MissingRef { .. } | HostError::Malformed { .. } => false,
        }
    }
}

/// Read-only view of the upstream source-control host
pub trait SourceHost: Send + Sync {
    /// Commit hash at the tip of `branch`
    fn branch_tip(&self, branch: &str) -> Result<String, HostError>;

    /// Contents of `path` at `commit`; `None` when the file does not exist
    fn read_file(&self, commit: &str, path: &str) -> Result<Option<String>, HostError>;
}

/// GitHub REST API client
pub struct GithubHost {
    client: reqwest::blocking::Client,
    api_base: String,
    repository: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GithubHost {
    pub fn new(
        repository: &str,
        token: Option<&str>,
        timeout: std::time::Duration,
        retry: RetryPolicy,
    ) -> Result<Self, HostError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("dist-promote")
            .build()
            .map_err(|source| HostError::Request {
                url: "https://api.github.com".to_string(),
                source,
            })?;

        Ok(Self {
            client,
            api_base: "https://api.github.com".to_string(),
            repository: repository.to_string(),
            token: token.map(str::to_string),
            retry,
        })
    }

    /// Point the client at a different API base (test servers)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// One GET against the API; `Ok(None)` on 404
    fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>, HostError> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().map_err(|source| HostError::Request {
            url: url.to_string(),
            source,
        })?;

        match response.status().as_u16() {
            200 => {
                let value = response.json().map_err(|source| HostError::Request {
                    url: url.to_string(),
                    source,
                })?;
                Ok(Some(value))
            }
            404 => Ok(None),
            status => Err(HostError::Status {
                url: url.to_string(),
                status,
            }),
        }
    }
}

impl SourceHost for GithubHost {
    fn branch_tip(&self, branch: &str) -> Result<String, HostError> {
        let url = format!(
            "{}/repos/{}/git/ref/heads/{}",
            self.api_base, self.repository, branch
        );

        let value = self
            .retry
            .run_where("branch tip lookup", || self.get_json(&url), HostError::is_transient)?
            .ok_or_else(|| HostError::MissingRef {
                repository: self.repository.clone(),
                git_ref: format!("refs/heads/{}", branch),
            })?;

        value["object"]["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HostError::Malformed {
                url,
                reason: "response has no object.sha".to_string(),
            })
    }

    fn read_file(&self, commit: &str, path: &str) -> Result<Option<String>, HostError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.api_base, self.repository, path, commit
        );

        let value = match self
            .retry
            .run_where("file read", || self.get_json(&url), HostError::is_transient)?
        {
            Some(value) => value,
            None => return Ok(None),
        };

        let content = value["content"]
            .as_str()
            .ok_or_else(|| HostError::Malformed {
                url: url.clone(),
                reason: "response has no content field".to_string(),
            })?;

        // The contents API wraps base64 at 60 columns.
        let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(stripped)
            .map_err(|e| HostError::Malformed {
                url: url.clone(),
                reason: format!("content is not base64: {}", e),
            })?;

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| HostError::Malformed {
                url,
                reason: "content is not UTF-8".to_string(),
            })
    }
}

/// In-memory source host for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    branches: HashMap<String, String>,
    files: HashMap<(String, String), String>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch: &str, commit: &str) -> Self {
        self.branches.insert(branch.to_string(), commit.to_string());
        self
    }

    pub fn with_file(mut self, commit: &str, path: &str, contents: &str) -> Self {
        self.files
            .insert((commit.to_string(), path.to_string()), contents.to_string());
        self
    }
}

impl SourceHost for MockHost {
    fn branch_tip(&self, branch: &str) -> Result<String, HostError> {
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| HostError::MissingRef {
                repository: "mock".to_string(),
                git_ref: format!("refs/heads/{}", branch),
            })
    }

    fn read_file(&self, commit: &str, path: &str) -> Result<Option<String>, HostError> {
        Ok(self
            .files
            .get(&(commit.to_string(), path.to_string()))
            .cloned())
    }
}
