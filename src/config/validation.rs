//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities, thresholds and durations > 0)
//! - Check cross-field consistency (shards vs capacity)
//! - Compile validator rules so bad patterns fail at load time
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::security::rules::RuleSet;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    if config.cache.capacity == 0 {
        issues.push(ConfigIssue::new("cache.capacity", "must be greater than 0"));
    }
    if config.cache.shards == 0 {
        issues.push(ConfigIssue::new("cache.shards", "must be greater than 0"));
    } else if config.cache.shards > config.cache.capacity {
        issues.push(ConfigIssue::new(
            "cache.shards",
            format!(
                "{} shards exceed capacity {}; every shard needs room for one entry",
                config.cache.shards, config.cache.capacity
            ),
        ));
    }
    if config.cache.default_ttl_ms == 0 {
        issues.push(ConfigIssue::new("cache.default_ttl_ms", "must be greater than 0"));
    }
    if config.cache.negative_ttl_ms == Some(0) {
        issues.push(ConfigIssue::new(
            "cache.negative_ttl_ms",
            "must be greater than 0 when set; omit it to disable negative caching",
        ));
    }

    if config.limiter.max_concurrency == 0 {
        issues.push(ConfigIssue::new("limiter.max_concurrency", "must be greater than 0"));
    }
    if config.limiter.acquire_timeout_ms == 0 {
        issues.push(ConfigIssue::new("limiter.acquire_timeout_ms", "must be greater than 0"));
    }

    if config.breaker.dependency.trim().is_empty() {
        issues.push(ConfigIssue::new("breaker.dependency", "must not be empty"));
    }
    if config.breaker.failure_threshold == 0 {
        issues.push(ConfigIssue::new("breaker.failure_threshold", "must be greater than 0"));
    }
    if config.breaker.open_duration_ms == 0 {
        issues.push(ConfigIssue::new("breaker.open_duration_ms", "must be greater than 0"));
    }

    if config.timeouts.operation_ms == 0 {
        issues.push(ConfigIssue::new("timeouts.operation_ms", "must be greater than 0"));
    }

    if config.retries.max_attempts == 0 {
        issues.push(ConfigIssue::new("retries.max_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        issues.push(ConfigIssue::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.validator.max_depth == 0 {
        issues.push(ConfigIssue::new("validator.max_depth", "must be greater than 0"));
    }
    if config.validator.max_string_len == 0 {
        issues.push(ConfigIssue::new("validator.max_string_len", "must be greater than 0"));
    }
    if let Err(e) = RuleSet::from_config(&config.validator) {
        issues.push(ConfigIssue::new("validator.rules", e.to_string()));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
