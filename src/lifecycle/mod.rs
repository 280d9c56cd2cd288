//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build validator, cache, limiter, breaker → Gateway
//!     → Spawn sweeper + health reporter
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Close limiter → Broadcast to tasks → Drain with deadline
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core state, then background tasks
//! - Shutdown has a timeout: tasks that do not stop in time are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{SignalEvent, SignalListener};
pub use startup::{Foundation, ReloadOutcome, StartupError};
