//! Bounded wait-and-resubmit for rate-limited calls.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use cosmos_core::error::NetworkError;

/// How often and how patiently to retry a rate-limited call.
///
/// Only [`NetworkError::RateLimited`] is retried; every other error returns
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
        }
    }

    pub fn run<T, F>(&self, mut op: F) -> Result<T, NetworkError>
    where
        F: FnMut() -> Result<T, NetworkError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(NetworkError::RateLimited(who)) if attempt < attempts => {
                    debug!(%who, attempt, wait_ms = self.wait.as_millis() as u64, "retry: rate limited");
                    thread::sleep(self.wait);
                    attempt += 1;
                }
                Err(NetworkError::RateLimited(who)) => {
                    warn!(%who, attempts, "retry: giving up");
                    return Err(NetworkError::RateLimited(who));
                }
                other => return other,
            }
        }
    }
}
