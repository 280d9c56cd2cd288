//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::rules::{RuleCategory, RuleTarget, Severity};

/// Root configuration for the data access gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Input validator rules and limits.
    pub validator: ValidatorConfig,

    /// Cache sizing and expiry.
    pub cache: CacheConfig,

    /// Concurrency limiter.
    pub limiter: LimiterConfig,

    /// Circuit breaker for the primary database.
    pub breaker: BreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Caller-side retry helper configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Input validator configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Deepest allowed nesting of maps/lists (root is 0).
    pub max_depth: usize,

    /// Longest allowed string value in bytes.
    pub max_string_len: usize,

    /// Built-in rule ids to switch off.
    pub disabled_rules: Vec<String>,

    /// Extra rules appended after the built-ins.
    pub rules: Vec<RuleConfig>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_string_len: 16 * 1024,
            disabled_rules: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// A custom rejection rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuleConfig {
    /// Unique rule identifier reported in validation errors.
    pub id: String,

    pub category: RuleCategory,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    #[serde(default)]
    pub target: RuleTarget,

    /// Regular expression; a match rejects the field.
    pub pattern: String,
}

fn default_severity() -> Severity {
    Severity::High
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries across all shards.
    pub capacity: usize,

    /// Number of independently locked shards.
    pub shards: usize,

    /// TTL applied to entries populated by reads, in milliseconds.
    pub default_ttl_ms: u64,

    /// TTL for "not found" entries. `None` disables negative caching.
    pub negative_ttl_ms: Option<u64>,

    /// Interval of the background expiry sweep, in milliseconds. 0 disables it.
    pub sweep_interval_ms: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn negative_ttl(&self) -> Option<Duration> {
        self.negative_ttl_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            shards: 16,
            default_ttl_ms: 60_000,
            negative_ttl_ms: None,
            sweep_interval_ms: 30_000,
        }
    }
}

/// Concurrency limiter configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum simultaneous in-flight database operations.
    pub max_concurrency: usize,

    /// How long a caller waits for a permit, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl LimiterConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 64,
            acquire_timeout_ms: 1_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Name of the protected dependency.
    pub dependency: String,

    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call, in milliseconds.
    pub open_duration_ms: u64,
}

impl BreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            dependency: "primary-database".to_string(),
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

/// Timeout configuration for database operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single database call, in milliseconds.
    pub operation_ms: u64,
}

impl TimeoutConfig {
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { operation_ms: 5_000 }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_format: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// How often the binary logs a health snapshot, in seconds. 0 disables it.
    pub health_log_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_format: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            health_log_interval_secs: 60,
        }
    }
}
