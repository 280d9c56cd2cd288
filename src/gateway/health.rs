//! Gateway health report.
//!
//! # States
//! - Healthy: breaker closed, limiter accepting
//! - Degraded: trial in flight, or callers queued behind a saturated limiter
//! - Unavailable: breaker open, or limiter closed for shutdown
//!
//! # Design Decisions
//! - A report is a snapshot assembled from lock-free reads; producing one never
//!   waits on the database or on a permit
//! - Serializable so operational tooling can log or expose it as JSON
//! - `HealthReporter` logs a report periodically until shutdown

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;

use crate::cache::CacheStats;
use crate::datetime::UtcInstant;
use crate::gateway::service::DataGateway;
use crate::resilience::{BreakerSnapshot, CircuitState, LimiterSnapshot};

/// Overall gateway condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthStatus {
    /// Derive the overall status from breaker and limiter state.
    pub fn assess(breaker: &BreakerSnapshot, limiter: &LimiterSnapshot) -> Self {
        if breaker.state == CircuitState::Open || limiter.closed {
            return HealthStatus::Unavailable;
        }
        if breaker.state == CircuitState::HalfOpen || limiter.waiting > 0 {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}

/// Current breaker state, limiter utilization and cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub checked_at: UtcInstant,
    pub breaker: BreakerSnapshot,
    pub limiter: LimiterSnapshot,
    pub cache: CacheStats,
}

/// Periodically logs the gateway health report.
pub struct HealthReporter {
    gateway: Arc<DataGateway>,
    interval: Duration,
}

impl HealthReporter {
    pub fn new(gateway: Arc<DataGateway>, interval: Duration) -> Self {
        Self { gateway, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Health reporter starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health reporter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Produce and log one report.
    pub fn report_once(&self) -> GatewayHealth {
        let health = self.gateway.health();
        if health.status == HealthStatus::Healthy {
            tracing::info!(
                breaker = %health.breaker.state,
                in_flight = health.limiter.in_flight,
                cache_entries = health.cache.entries,
                "Gateway healthy"
            );
        } else {
            tracing::warn!(
                status = ?health.status,
                breaker = %health.breaker.state,
                in_flight = health.limiter.in_flight,
                waiting = health.limiter.waiting,
                cache_entries = health.cache.entries,
                "Gateway not healthy"
            );
        }
        health
    }
}
