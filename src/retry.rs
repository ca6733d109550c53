//! Bounded retry with exponential backoff
//!
//! Transient network failures (upstream fetches, source-host reads, CDN
//! purges) are retried a bounded number of times. The marker, manifest,
//! and signature writes never go through this path: they either succeed
//! on the first attempt or the run fails.

use std::fmt;
use std::thread;
use std::time::Duration;

/// Retry policy: a bounded number of attempts with doubling delay
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub attempts: u32,

    /// Delay before the second attempt; doubles per subsequent attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying every failure up to the attempt bound
    pub fn run<T, E: fmt::Display>(
        &self,
        what: &str,
        op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        self.run_where(what, op, |_| true)
    }

    /// Run `op`, retrying only failures for which `retryable` returns true
    pub fn run_where<T, E: fmt::Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay;

        for attempt in 1..=attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && retryable(&err) => {
                    eprintln!(
                        "[retry] {} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, attempts, err, delay
                    );
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }
}
