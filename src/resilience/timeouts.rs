//! Deadline enforcement for database calls.
//!
//! # Responsibilities
//! - Bound every database call with a deadline
//! - Drop (cancel) the underlying future when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The caller maps an elapsed deadline into its own error type, so a
//!   timeout stays distinct from other failures

use std::future::Future;
use std::time::Duration;

/// Run `fut` with a deadline; on expiry the future is dropped and
/// `on_timeout(deadline)` becomes the error.
pub async fn with_deadline<T, E, F>(
    deadline: Duration,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "Operation deadline exceeded");
            Err(on_timeout(deadline))
        }
    }
}
