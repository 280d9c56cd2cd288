//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → sizing sections consumed once by lifecycle::startup
//!
//! On reload signal:
//!     watcher.rs detects change (or SIGHUP)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → validator rule set swapped atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only validator rules are hot-swappable
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakerConfig, CacheConfig, GatewayConfig, LimiterConfig, ObservabilityConfig, RetryConfig,
    RuleConfig, TimeoutConfig, ValidatorConfig,
};
pub use validation::{validate_config, ConfigIssue};
