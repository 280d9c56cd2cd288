//! Caller-side retry helper.
//!
//! # Responsibilities
//! - Re-run an operation whose error says it is retryable
//! - Wait between attempts with exponential backoff + jitter
//! - Honour a server-provided retry-after hint (e.g. an open circuit)
//!
//! # Design Decisions
//! - The gateway itself never retries; a retry inside it would multiply
//!   load on a struggling database. Callers opt in here.
//! - Non-retryable errors (validation, not-found) return immediately

use std::future::Future;
use std::time::Duration;

use crate::config::schema::RetryConfig;
use crate::resilience::backoff::backoff_for;

/// Errors that know whether repeating the call can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Minimum wait before the next attempt, if the error carries one.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Run `op` up to `policy.max_attempts` times while it fails with a
/// retryable error. Returns the last error when attempts run out.
pub async fn retry_transient<T, E, F, Fut>(policy: &RetryConfig, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_for(policy, attempt).max(e.retry_after().unwrap_or_default());
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
