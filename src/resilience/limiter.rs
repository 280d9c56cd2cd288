//! Concurrency limiter for database operations.
//!
//! # Responsibilities
//! - Bound in-flight database operations to a configured maximum
//! - Make callers wait (per task, not per process) for a bounded time
//! - Hand out RAII permits that release on every exit path
//!
//! # Design Decisions
//! - Backed by Tokio's semaphore: FIFO wakeups, cancellation-safe waits
//! - Never waits unboundedly; a timed-out wait is `AcquireError::Timeout`
//! - Releasing consumes the permit, so a double release cannot be expressed
//! - Counters are atomics; no lock is held while the guarded operation runs

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::schema::LimiterConfig;
use crate::observability::metrics;

/// Errors from permit acquisition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("no permit available within {waited:?} (limit {limit})")]
    Timeout { waited: Duration, limit: usize },

    #[error("limiter is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    issued: AtomicU64,
    released: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub max_concurrency: usize,
    pub in_flight: usize,
    pub available: usize,
    pub waiting: usize,
    pub issued_total: u64,
    pub released_total: u64,
    pub timeouts_total: u64,
    pub closed: bool,
    /// `in_flight / max_concurrency`, in `[0, 1]`.
    pub utilization: f64,
}

/// Bounds the number of simultaneous in-flight operations.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    default_timeout: Duration,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `max` permits.
    ///
    /// # Panics
    ///
    /// Panics if `max` is 0.
    pub fn new(max: usize, default_timeout: Duration) -> Self {
        assert!(max > 0, "Limiter max concurrency must be greater than 0");
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            default_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Build from configuration (validated to have `max_concurrency > 0`).
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.max_concurrency.max(1), config.acquire_timeout())
    }

    /// The configured acquire timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Wait up to `timeout` for a permit.
    ///
    /// Dropping the returned future while waiting abandons the wait without
    /// consuming a permit.
    pub async fn acquire(&self, timeout: Duration) -> Result<Permit, AcquireError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(self.issue(permit));
        }

        let _waiting = WaitingGuard::enter(&self.counters);
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.issue(permit)),
            Ok(Err(_)) => Err(AcquireError::Closed),
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_limiter_timeout();
                tracing::warn!(
                    limit = self.max,
                    waited_ms = timeout.as_millis() as u64,
                    "Permit acquisition timed out"
                );
                Err(AcquireError::Timeout {
                    waited: timeout,
                    limit: self.max,
                })
            }
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.issue(permit))
    }

    /// Give a permit back. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Reject current waiters and all future acquisitions. Held permits stay valid.
    pub fn close(&self) {
        tracing::info!(in_flight = self.in_flight(), "Limiter closed");
        self.semaphore.close();
    }

    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let in_flight = self.in_flight();
        LimiterSnapshot {
            max_concurrency: self.max,
            in_flight,
            available: self.semaphore.available_permits(),
            waiting: self.counters.waiting.load(Ordering::Relaxed),
            issued_total: self.counters.issued.load(Ordering::Relaxed),
            released_total: self.counters.released.load(Ordering::Relaxed),
            timeouts_total: self.counters.timeouts.load(Ordering::Relaxed),
            closed: self.semaphore.is_closed(),
            utilization: in_flight as f64 / self.max as f64,
        }
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> Permit {
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        metrics::record_limiter_in_flight(in_flight);
        tracing::trace!(in_flight, limit = self.max, "Permit issued");
        Permit {
            counters: self.counters.clone(),
            _permit: permit,
        }
    }
}

/// The right to run one in-flight operation. Released when dropped.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    counters: Arc<Counters>,
    // Dropped after `Drop::drop` runs, so `in_flight` falls before capacity returns.
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Release explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let in_flight = self.counters.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        self.counters.released.fetch_add(1, Ordering::Relaxed);
        metrics::record_limiter_in_flight(in_flight);
    }
}

struct WaitingGuard<'a> {
    counters: &'a Counters,
}

impl<'a> WaitingGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.waiting.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.counters.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2, WAIT);
        let p1 = limiter.acquire(WAIT).await.unwrap();
        let p2 = limiter.acquire(WAIT).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert_eq!(limiter.snapshot().available, 0);
        assert!(limiter.try_acquire().is_none());

        limiter.release(p1);
        assert_eq!(limiter.in_flight(), 1);
        p2.release();

        let snap = limiter.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.available, 2);
        assert_eq!(snap.issued_total, snap.released_total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_n_plus_one_times_out() {
        let limiter = ConcurrencyLimiter::new(3, WAIT);
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(limiter.acquire(WAIT).await.unwrap());
        }

        let err = limiter.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(
            err,
            AcquireError::Timeout {
                waited: Duration::from_millis(50),
                limit: 3
            }
        );
        let snap = limiter.snapshot();
        assert_eq!(snap.timeouts_total, 1);
        assert_eq!(snap.waiting, 0);
        assert_eq!(snap.in_flight, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_limit_under_contention() {
        let limiter = Arc::new(ConcurrencyLimiter::new(5, WAIT));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let limiter = limiter.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let permit = limiter.acquire(WAIT).await.unwrap();
                    peak.fetch_max(limiter.in_flight(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    drop(permit);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 5);
        let snap = limiter.snapshot();
        assert_eq!(snap.issued_total, 64);
        assert_eq!(snap.released_total, 64);
        assert_eq!(snap.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_request_order() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1, WAIT));
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = limiter.acquire(WAIT).await.unwrap();

        let mut tasks = Vec::new();
        for id in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let permit = limiter.acquire(WAIT).await.unwrap();
                order.lock().unwrap().push(id);
                tokio::time::sleep(Duration::from_millis(1)).await;
                drop(permit);
            }));
            // Let this waiter enqueue before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(limiter.snapshot().waiting, 4);
        drop(held);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_leak() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1, WAIT));
        let held = limiter.acquire(WAIT).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(Duration::from_secs(60)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.snapshot().waiting, 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        drop(held);

        let snap = limiter.snapshot();
        assert_eq!(snap.waiting, 0);
        assert_eq!(snap.available, 1);
        assert_eq!(snap.issued_total, snap.released_total);
    }

    #[tokio::test]
    async fn test_permit_released_on_error_path() {
        async fn guarded(limiter: &ConcurrencyLimiter) -> Result<(), &'static str> {
            let _permit = limiter.acquire(WAIT).await.map_err(|_| "overloaded")?;
            Err("database exploded")
        }

        let limiter = ConcurrencyLimiter::new(1, WAIT);
        assert!(guarded(&limiter).await.is_err());
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_rejects_waiters() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1, WAIT));
        let held = limiter.acquire(WAIT).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(Duration::from_secs(60)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        limiter.close();
        assert_eq!(waiter.await.unwrap(), Err(AcquireError::Closed));
        assert_eq!(limiter.acquire(WAIT).await.unwrap_err(), AcquireError::Closed);
        assert!(limiter.snapshot().closed);
        drop(held);
    }

    #[test]
    #[should_panic(expected = "Limiter max concurrency must be greater than 0")]
    fn test_zero_limit() {
        ConcurrencyLimiter::new(0, WAIT);
    }
}
