//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Database call from the gateway:
//!     → limiter.rs (wait, bounded, for an in-flight permit)
//!     → circuit_breaker.rs (fail fast while the database is considered down)
//!     → timeouts.rs (deadline on the call itself)
//!     → permit dropped on every exit path
//!
//! Caller wanting to retry a gateway error:
//!     → retries.rs (retryable check, backoff.rs delay, retry-after hint)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every database call and every permit wait has a deadline
//! - Limiter and breaker share no locks; each is independently thread-safe
//! - Breakers are per dependency (registry.rs), never process-global
//! - Retries live outside the gateway so overload is not amplified

pub mod backoff;
pub mod circuit_breaker;
pub mod limiter;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitError, CircuitState};
pub use limiter::{AcquireError, ConcurrencyLimiter, LimiterSnapshot, Permit};
pub use registry::BreakerRegistry;
pub use retries::{retry_transient, Retryable};
pub use timeouts::with_deadline;
