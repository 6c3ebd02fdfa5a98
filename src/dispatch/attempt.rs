//! Per-request attempt accounting.

use crate::config::DispatchConfig;
use std::fmt;
use std::time::Duration;

/// How many times one logical request has been dispatched and retried.
///
/// Values are never mutated in place; each step produces a new record that
/// is threaded through the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Logical dispatches so far, starting at 1.
    pub attempts: u32,
    /// Retries against the currently selected backend, starting at 0.
    pub retry: u32,
}

impl Attempt {
    pub const fn new(attempts: u32, retry: u32) -> Self {
        Self { attempts, retry }
    }

    /// Record for a request entering the balancer.
    pub const fn first() -> Self {
        Self::new(1, 0)
    }

    /// Same backend, one more retry.
    pub const fn next_retry(self) -> Self {
        Self::new(self.attempts, self.retry + 1)
    }

    /// Fresh selection: one more attempt, retries start over.
    pub const fn next_attempt(self) -> Self {
        Self::new(self.attempts + 1, 0)
    }
}

impl Default for Attempt {
    fn default() -> Self {
        Self::first()
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {} retry {}", self.attempts, self.retry)
    }
}

/// Bounds on attempts and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// A request with more attempts than this is rejected.
    pub max_attempts: u32,
    /// Retries against one backend before it is demoted.
    pub max_retries: u32,
    /// Pause before each retry against the same backend.
    pub retry_delay: Duration,
    /// Request bodies larger than this are refused before dispatch.
    pub max_body_size: usize,
}

impl DispatchPolicy {
    pub fn attempts_exhausted(&self, attempt: Attempt) -> bool {
        attempt.attempts > self.max_attempts
    }

    pub fn can_retry(&self, attempt: Attempt) -> bool {
        attempt.retry < self.max_retries
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            max_body_size: config.max_body_size,
        }
    }
}
