//! Circuit breaker for database protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: database assumed down, calls fail fast
//! - Half-Open: a single trial call checks whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: open duration elapsed; exactly one caller wins the trial
//! Half-Open → Closed: trial succeeds (failure count reset)
//! Half-Open → Open: trial fails or is cancelled (timer restarts)
//! ```
//!
//! # Design Decisions
//! - State shares one `AtomicU64` with the open timestamp (Open, Half-Open)
//!   or a closed-period sequence number (Closed), so every transition is a
//!   single compare-and-swap with no lock
//! - The failure count is tagged with its closed period and only changes by
//!   compare-and-swap; late results from an earlier period can neither count
//!   toward nor reset the current one
//! - Rejections carry the remaining open time so callers never retry blindly
//! - Errors the caller classifies as non-failures (not-found, conflict)
//!   neither trip nor reset the counter

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::schema::BreakerConfig;
use crate::datetime::{Clock, UtcInstant};
use crate::observability::metrics;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    const fn tag(self) -> u64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_tag(tag: u64) -> Self {
        match tag {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = 0b11;
const NO_FAILURE: i64 = i64::MIN;
const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = 0xffff_ffff;

/// State word: `payload << 2 | state`. The payload is the open timestamp in
/// millis for Open and Half-Open, the closed-period number for Closed.
fn pack(state: CircuitState, payload: u64) -> u64 {
    (payload << STATE_BITS) | state.tag()
}

fn unpack(word: u64) -> (CircuitState, u64) {
    (CircuitState::from_tag(word & STATE_MASK), word >> STATE_BITS)
}

fn millis(at: UtcInstant) -> u64 {
    at.as_millis().max(0) as u64
}

/// Failure word: low bits of the closed period above the consecutive count.
fn pack_failures(period: u64, count: u32) -> u64 {
    ((period & COUNT_MASK) << COUNT_BITS) | u64::from(count)
}

fn unpack_failures(word: u64) -> (u64, u32) {
    (word >> COUNT_BITS, (word & COUNT_MASK) as u32)
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum CircuitError<E> {
    /// Circuit is open (or a trial is in flight); the call was not attempted.
    Open {
        circuit: String,
        state: CircuitState,
        retry_after: Duration,
    },
    /// The wrapped operation ran and failed.
    Execution(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

impl<E: fmt::Display> fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitError::Open {
                circuit,
                state,
                retry_after,
            } => write!(
                f,
                "Circuit '{}' is {} (retry after {}ms)",
                circuit,
                state,
                retry_after.as_millis()
            ),
            CircuitError::Execution(e) => write!(f, "Circuit execution failed: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// Point-in-time breaker state for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub circuit: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration_ms: u64,
    pub last_failure_at: Option<UtcInstant>,
    pub last_transition_at: UtcInstant,
    pub trips_total: u64,
    pub rejections_total: u64,
}

/// How an admitted call was let through.
#[derive(Debug, Clone, Copy)]
enum Admission {
    /// Ordinary call during closed period `period`.
    Closed { period: u64 },
    /// The single half-open trial.
    Trial { epoch: u64 },
}

enum Outcome {
    Success,
    Failure,
    /// Error the classifier does not count as a database failure.
    Ignored,
    Cancelled,
}

/// Lock-free circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
    state: AtomicU64,
    /// Last closed-period number handed out.
    periods: AtomicU64,
    failures: AtomicU64,
    last_failure: AtomicI64,
    transitioned_at: AtomicI64,
    trips: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Panics
    ///
    /// Panics if `failure_threshold` is 0 or `open_duration` is zero.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        open_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        assert!(failure_threshold > 0, "Breaker failure threshold must be greater than 0");
        assert!(!open_duration.is_zero(), "Breaker open duration must be non-zero");

        let now = clock.now();
        Self {
            name: name.into(),
            failure_threshold,
            open_duration,
            clock,
            state: AtomicU64::new(pack(CircuitState::Closed, 1)),
            periods: AtomicU64::new(1),
            failures: AtomicU64::new(pack_failures(1, 0)),
            last_failure: AtomicI64::new(NO_FAILURE),
            transitioned_at: AtomicI64::new(now.as_millis()),
            trips: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Build from configuration; the circuit is named after the dependency.
    pub fn from_config(config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.dependency.clone(),
            config.failure_threshold,
            config.open_duration(),
            clock,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored state. Does not advance Open to Half-Open; only an admitted call does.
    pub fn state(&self) -> CircuitState {
        unpack(self.state.load(Ordering::Acquire)).0
    }

    pub fn consecutive_failures(&self) -> u32 {
        unpack_failures(self.failures.load(Ordering::Acquire)).1
    }

    /// Run `op` through the breaker, counting every error as a failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(op, |_| true).await
    }

    /// Run `op` through the breaker. `is_failure` decides which errors count.
    ///
    /// If the future is dropped while it holds the half-open trial, the
    /// circuit re-opens.
    pub async fn call_with<T, E, F, Fut, C>(&self, op: F, is_failure: C) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let admission = self.admit()?;
        let guard = CallGuard {
            breaker: self,
            admission: Some(admission),
        };

        match op().await {
            Ok(value) => {
                guard.finish(Outcome::Success);
                Ok(value)
            }
            Err(e) => {
                let outcome = if is_failure(&e) {
                    Outcome::Failure
                } else {
                    Outcome::Ignored
                };
                guard.finish(outcome);
                Err(CircuitError::Execution(e))
            }
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        let period = self.next_period();
        self.state.store(pack(CircuitState::Closed, period), Ordering::Release);
        self.begin_counting(period);
        self.last_failure.store(NO_FAILURE, Ordering::Release);
        self.transitioned_at.store(self.clock.now().as_millis(), Ordering::Release);
        tracing::info!(circuit = %self.name, "Circuit manually reset");
        self.transitioned(CircuitState::Closed);
    }

    /// Force the circuit open; the open timer starts now.
    pub fn force_open(&self) {
        let now = self.clock.now();
        self.state.store(pack(CircuitState::Open, millis(now)), Ordering::Release);
        self.transitioned_at.store(now.as_millis(), Ordering::Release);
        tracing::warn!(circuit = %self.name, "Circuit manually forced open");
        self.transitioned(CircuitState::Open);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (state, _) = unpack(self.state.load(Ordering::Acquire));
        let last_failure = self.last_failure.load(Ordering::Acquire);
        let since = self.transitioned_at.load(Ordering::Acquire);
        BreakerSnapshot {
            circuit: self.name.clone(),
            state,
            consecutive_failures: self.consecutive_failures(),
            failure_threshold: self.failure_threshold,
            open_duration_ms: self.open_duration.as_millis() as u64,
            last_failure_at: (last_failure != NO_FAILURE)
                .then(|| UtcInstant::from_millis(last_failure))
                .flatten(),
            last_transition_at: UtcInstant::from_millis(since).unwrap_or(UtcInstant::EPOCH),
            trips_total: self.trips.load(Ordering::Relaxed),
            rejections_total: self.rejections.load(Ordering::Relaxed),
        }
    }

    fn admit<E>(&self) -> Result<Admission, CircuitError<E>> {
        loop {
            let word = self.state.load(Ordering::Acquire);
            let (state, payload) = unpack(word);
            match state {
                CircuitState::Closed => return Ok(Admission::Closed { period: payload }),
                CircuitState::Open => {
                    let now = self.clock.now();
                    let elapsed = Duration::from_millis(millis(now).saturating_sub(payload));
                    if elapsed < self.open_duration {
                        return Err(self.reject(state, self.open_duration - elapsed));
                    }

                    let trial = pack(CircuitState::HalfOpen, millis(now));
                    if self
                        .state
                        .compare_exchange(word, trial, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.transitioned_at.store(now.as_millis(), Ordering::Release);
                        tracing::info!(circuit = %self.name, "Circuit half-open, admitting trial call");
                        self.transitioned(CircuitState::HalfOpen);
                        return Ok(Admission::Trial { epoch: trial });
                    }
                    // Another caller moved the state first; re-evaluate.
                }
                CircuitState::HalfOpen => {
                    return Err(self.reject(state, self.open_duration));
                }
            }
        }
    }

    fn reject<E>(&self, state: CircuitState, retry_after: Duration) -> CircuitError<E> {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            circuit = %self.name,
            state = %state,
            retry_after_ms = retry_after.as_millis() as u64,
            "Call rejected by circuit breaker"
        );
        CircuitError::Open {
            circuit: self.name.clone(),
            state,
            retry_after,
        }
    }

    fn record(&self, admission: Admission, outcome: Outcome) {
        match (admission, outcome) {
            (Admission::Closed { period }, Outcome::Success) => self.closed_success(period),
            (Admission::Closed { .. }, Outcome::Ignored | Outcome::Cancelled) => {}
            (Admission::Closed { period }, Outcome::Failure) => self.closed_failure(period),
            (Admission::Trial { epoch }, Outcome::Success | Outcome::Ignored) => {
                let period = self.next_period();
                let closed = pack(CircuitState::Closed, period);
                if self
                    .state
                    .compare_exchange(epoch, closed, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.begin_counting(period);
                    self.transitioned_at.store(self.clock.now().as_millis(), Ordering::Release);
                    tracing::info!(circuit = %self.name, "Trial call succeeded, circuit closed");
                    self.transitioned(CircuitState::Closed);
                }
            }
            (Admission::Trial { epoch }, outcome @ (Outcome::Failure | Outcome::Cancelled)) => {
                let now = self.clock.now();
                self.last_failure.store(now.as_millis(), Ordering::Release);
                let reopened = pack(CircuitState::Open, millis(now));
                if self
                    .state
                    .compare_exchange(epoch, reopened, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.transitioned_at.store(now.as_millis(), Ordering::Release);
                    self.trips.fetch_add(1, Ordering::Relaxed);
                    let reason = if matches!(outcome, Outcome::Cancelled) {
                        "cancelled"
                    } else {
                        "failed"
                    };
                    tracing::warn!(
                        circuit = %self.name,
                        reason,
                        open_ms = self.open_duration.as_millis() as u64,
                        "Trial call did not succeed, circuit re-opened"
                    );
                    self.transitioned(CircuitState::Open);
                }
            }
        }
    }

    fn next_period(&self) -> u64 {
        self.periods.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Start a zero count for `period` unless a failure already claimed it.
    fn begin_counting(&self, period: u64) {
        let tag = period & COUNT_MASK;
        let _ = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (unpack_failures(word).0 != tag).then(|| pack_failures(period, 0))
            });
    }

    fn closed_success(&self, period: u64) {
        let closed = pack(CircuitState::Closed, period);
        let tag = period & COUNT_MASK;
        let _ = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (current, count) = unpack_failures(word);
                (current == tag && count != 0 && self.state.load(Ordering::Acquire) == closed)
                    .then(|| pack_failures(period, 0))
            });
    }

    fn closed_failure(&self, period: u64) {
        let now = self.clock.now();
        let closed = pack(CircuitState::Closed, period);
        let tag = period & COUNT_MASK;

        let mut word = self.failures.load(Ordering::Acquire);
        let failures = loop {
            // The period ended (tripped or reset) while this call ran.
            if self.state.load(Ordering::Acquire) != closed {
                return;
            }
            let (current, count) = unpack_failures(word);
            // A different tag means the count for this period was not started yet.
            let next = if current == tag { count.saturating_add(1) } else { 1 };
            match self.failures.compare_exchange_weak(
                word,
                pack_failures(period, next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next,
                Err(actual) => word = actual,
            }
        };
        self.last_failure.store(now.as_millis(), Ordering::Release);

        if failures < self.failure_threshold {
            tracing::debug!(circuit = %self.name, failures, "Failure recorded");
            return;
        }

        let open = pack(CircuitState::Open, millis(now));
        if self
            .state
            .compare_exchange(closed, open, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.transitioned_at.store(now.as_millis(), Ordering::Release);
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                circuit = %self.name,
                failures,
                threshold = self.failure_threshold,
                open_ms = self.open_duration.as_millis() as u64,
                "Failure threshold reached, circuit opened"
            );
            self.transitioned(CircuitState::Open);
        }
    }

    fn transitioned(&self, to: CircuitState) {
        metrics::record_breaker_transition(&self.name, to.as_str());
        metrics::record_breaker_state(&self.name, to.tag() as f64);
    }
}

/// Resolves an admission exactly once; a dropped trial counts as cancelled.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl CallGuard<'_> {
    fn finish(mut self, outcome: Outcome) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record(admission, outcome);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record(admission, Outcome::Cancelled);
        }
    }
}
