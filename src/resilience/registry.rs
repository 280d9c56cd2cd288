//! Named circuit breakers, one per dependency.
//!
//! The gateway guards a single database, but deployments that front more
//! than one store look breakers up by dependency name here so that every
//! call site for the same dependency shares one failure count.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::schema::BreakerConfig;
use crate::datetime::Clock;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

/// Registry of circuit breakers keyed by dependency name.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    failure_threshold: u32,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    /// Breakers created on demand use the thresholds from `config`.
    pub fn new(config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration().max(Duration::from_millis(1)),
            clock,
        }
    }

    /// The breaker for `dependency`, created closed on first use.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return breaker.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                tracing::debug!(circuit = %dependency, "Circuit breaker registered");
                Arc::new(CircuitBreaker::new(
                    dependency,
                    self.failure_threshold,
                    self.open_duration,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| b.clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots of every registered breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.circuit.cmp(&b.circuit));
        snapshots
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }
}
