//! Timestamp handling subsystem.
//!
//! # Data Flow
//! ```text
//! Caller-supplied timestamp (text, epoch number, chrono value)
//!     → normalize.rs (parse, apply naive-as-UTC policy)
//!     → UtcInstant (single unambiguous representation)
//!
//! Cache expiry / breaker windows:
//!     clock.rs (Clock::now) → UtcInstant arithmetic
//! ```
//!
//! # Design Decisions
//! - Naive timestamps are UTC, never local time
//! - Every internal timestamp is a `UtcInstant`; no naive values cross module boundaries
//! - Time is injected through `Clock` so expiry logic is testable without sleeping

pub mod clock;
pub mod normalize;

pub use clock::{Clock, ManualClock, SystemClock};
pub use normalize::{normalize, InvalidTimestampError, TimestampInput, UtcInstant};
