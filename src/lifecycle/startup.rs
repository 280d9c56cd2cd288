//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (cache sweep, health reporting)
//! - Apply reloaded configuration and drain on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every piece of shared state is built here and handed down; nothing is global
//! - Only validator rules change at runtime; sizing changes need a restart

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::CacheSweeper;
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ConfigIssue};
use crate::datetime::{Clock, SystemClock};
use crate::gateway::{DataGateway, Database, HealthReporter};
use crate::lifecycle::shutdown::Shutdown;
use crate::security::{RuleError, RuleSet};

/// Errors that prevent the gateway from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Config(Vec<ConfigIssue>),

    #[error("invalid validator rules: {0}")]
    Rules(#[from] RuleError),
}

/// Result of applying a reloaded configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Validator rules replaced.
    Applied,
    /// Nothing that can change at runtime differs.
    Unchanged,
    /// New validator rules failed to compile; the old ones stay.
    Rejected,
}

/// The running gateway and its background tasks.
pub struct Foundation {
    config: GatewayConfig,
    gateway: Arc<DataGateway>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Foundation {
    /// Build with the system clock.
    pub fn build(config: GatewayConfig, database: Arc<dyn Database>) -> Result<Self, StartupError> {
        Self::build_with_clock(config, database, Arc::new(SystemClock))
    }

    pub fn build_with_clock(
        config: GatewayConfig,
        database: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::Config)?;
        let gateway = DataGateway::from_config(&config, database, clock)?;

        tracing::info!(
            circuit = %config.breaker.dependency,
            max_concurrency = config.limiter.max_concurrency,
            cache_capacity = config.cache.capacity,
            cache_shards = config.cache.shards,
            validator_rules = gateway.validator().rules().len(),
            "Gateway initialized"
        );

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            shutdown: Shutdown::new(),
            tasks: Vec::new(),
        })
    }

    pub fn gateway(&self) -> &Arc<DataGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Spawn the cache sweeper and health reporter, when configured.
    pub fn start_background_tasks(&mut self) {
        if let Some(interval) = self.config.cache.sweep_interval() {
            let sweeper = CacheSweeper::new(self.gateway.cache().clone(), interval);
            self.tasks.push(tokio::spawn(sweeper.run(self.shutdown.subscribe())));
        }

        let health_secs = self.config.observability.health_log_interval_secs;
        if health_secs > 0 {
            let reporter =
                HealthReporter::new(self.gateway.clone(), Duration::from_secs(health_secs));
            self.tasks.push(tokio::spawn(reporter.run(self.shutdown.subscribe())));
        }
    }

    pub fn background_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Apply a reloaded, already validated configuration.
    pub fn apply_config(&mut self, new: GatewayConfig) -> ReloadOutcome {
        let restart_needed = new.cache != self.config.cache
            || new.limiter != self.config.limiter
            || new.breaker != self.config.breaker
            || new.timeouts != self.config.timeouts
            || new.observability != self.config.observability;
        if restart_needed {
            tracing::warn!("Configuration change outside [validator] requires a restart to take effect");
        }

        let outcome = if new.validator == self.config.validator {
            ReloadOutcome::Unchanged
        } else {
            match RuleSet::from_config(&new.validator) {
                Ok(rules) => {
                    self.gateway.reload_validator_rules(rules);
                    ReloadOutcome::Applied
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reloaded validator rules rejected, keeping current rules");
                    return ReloadOutcome::Rejected;
                }
            }
        };
        self.config = new;
        outcome
    }

    /// Stop accepting work, signal background tasks, and wait up to `grace`.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!("Shutting down gateway");
        self.gateway.limiter().close();
        self.shutdown.trigger();

        let drain = async {
            for task in self.tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Background task failed");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Background tasks did not stop in time");
        }
        tracing::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RuleConfig;
    use crate::gateway::{ErrorKind, MemoryDatabase};
    use crate::resilience::AcquireError;
    use crate::security::{RuleCategory, RuleTarget, Severity};
    use serde_json::json;

    fn database() -> Arc<dyn Database> {
        Arc::new(MemoryDatabase::with_documents([("sku-1", json!({"name": "lamp"}))]))
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = GatewayConfig::default();
        config.limiter.max_concurrency = 0;
        match Foundation::build(config, database()) {
            Err(StartupError::Config(issues)) => {
                assert!(issues.iter().any(|i| i.field == "limiter.max_concurrency"))
            }
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_build_serve_and_shutdown() {
        let mut foundation = Foundation::build(GatewayConfig::default(), database()).unwrap();
        foundation.start_background_tasks();
        assert_eq!(foundation.background_task_count(), 2);

        let gateway = foundation.gateway().clone();
        assert_eq!(gateway.read("sku-1").await.unwrap(), json!({"name": "lamp"}));

        foundation.shutdown(Duration::from_secs(1)).await;
        let err = gateway.write("sku-2", json!(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overloaded);
        assert!(matches!(err, crate::gateway::GatewayError::Overloaded(AcquireError::Closed)));
    }

    #[tokio::test]
    async fn test_apply_config_reloads_rules_only() {
        let mut foundation = Foundation::build(GatewayConfig::default(), database()).unwrap();

        assert_eq!(foundation.apply_config(GatewayConfig::default()), ReloadOutcome::Unchanged);

        let mut next = GatewayConfig::default();
        next.validator.rules.push(RuleConfig {
            id: "no-drafts".into(),
            category: RuleCategory::QueryInjection,
            severity: Severity::Low,
            target: RuleTarget::Value,
            pattern: "^draft-".into(),
        });
        next.cache.capacity = 1;
        assert_eq!(foundation.apply_config(next), ReloadOutcome::Applied);
        assert_eq!(
            foundation.gateway().read("draft-1").await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        // Sizing is fixed at startup.
        assert_eq!(foundation.gateway().cache().capacity(), 10_000);

        let mut broken = foundation.config().clone();
        broken.validator.rules[0].pattern = "(".into();
        assert_eq!(foundation.apply_config(broken), ReloadOutcome::Rejected);
        assert_eq!(foundation.config().validator.rules[0].pattern, "^draft-");
    }
}
