//! Bounded retry and polling helpers.
//!
//! Every wait in the tool goes through [`poll_until`], every transient-failure
//! retry through [`retry`]. Both block the calling task for a fixed interval
//! between attempts and have a hard upper bound; there is no external
//! cancellation.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("gave up waiting for {what}: {source}")]
    Aborted {
        what: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Fixed-delay retry: up to `attempts` tries, `delay_secs` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_attempts() -> u32 {
    6
}

fn default_delay_secs() -> u64 {
    10
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay_secs: u64) -> Self {
        Self {
            attempts,
            delay_secs,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(default_attempts(), default_delay_secs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run `op` until it succeeds or `policy.attempts` is exhausted.
///
/// `op` receives the 1-based attempt number. The error of the final attempt
/// is returned unchanged.
pub async fn retry<T, E, F, Fut>(what: &str, policy: RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(what, policy, op, |_| true).await
}

/// Like [`retry`], but an error for which `retryable` is false is returned
/// at once.
pub async fn retry_while<T, E, F, Fut, P>(
    what: &str,
    policy: RetryPolicy,
    mut op: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= attempts => {
                tracing::debug!(what, attempt, "final attempt failed");
                return Err(e);
            }
            Err(e) if !retryable(&e) => {
                tracing::debug!(what, attempt, error = %e, "not retrying");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    what,
                    attempt,
                    attempts,
                    error = %e,
                    "attempt failed, retrying in {}s",
                    policy.delay_secs
                );
                sleep(policy.delay()).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poll
// ---------------------------------------------------------------------------

/// Poll `check` immediately and then every `policy.interval` until it
/// returns `Ok(true)`. `Err` aborts at once; running past `policy.timeout`
/// yields [`WaitError::Timeout`].
pub async fn poll_until<F, Fut, E>(what: &str, policy: PollPolicy, mut check: F) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                return Err(WaitError::Aborted {
                    what: what.to_string(),
                    source: e.into(),
                })
            }
        }
        if Instant::now() >= deadline {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                after: policy.timeout,
            });
        }
        sleep(policy.interval).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
