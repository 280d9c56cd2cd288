//! Data access gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → service.rs (DataGateway: read / write / delete / health)
//!     → security::InputValidator → cache::ShardedCache
//!     → resilience::ConcurrencyLimiter → resilience::CircuitBreaker
//!     → database.rs (Database trait, driver-specific errors)
//!     ← error.rs (GatewayError classified for retry decisions)
//! ```
//!
//! # Design Decisions
//! - All shared state is constructed once and handed in; no globals
//! - `Overloaded` (too many requests) and `Unavailable` (database down) stay distinct
//! - The database is reached only through an async trait so tests can script failures

pub mod database;
pub mod error;
pub mod health;
pub mod service;

pub use database::{Database, DbError, MemoryDatabase, WriteAck};
pub use error::{ErrorKind, GatewayError};
pub use health::{GatewayHealth, HealthReporter, HealthStatus};
pub use service::{DataGateway, GatewaySettings};
