//! Data-access reliability layer for a document database.
//!
//! Requests pass through input validation, a sharded TTL/LRU cache, a FIFO
//! concurrency limiter and a circuit breaker before reaching the database.
//! See [`gateway::DataGateway`] for the composed entry point.

// Building blocks
pub mod cache;
pub mod datetime;
pub mod security;

// Reliability
pub mod gateway;
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

/// An opaque stored document.
pub type Document = serde_json::Value;

pub use config::schema::GatewayConfig;
pub use gateway::{DataGateway, GatewayError};
pub use lifecycle::{Foundation, Shutdown};
