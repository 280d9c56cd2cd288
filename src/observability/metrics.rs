//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (operations, cache, limiter, breaker, validation)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gateway_operations_total` (counter): operations by `op`, `outcome`
//! - `gateway_operation_duration_seconds` (histogram): latency by `op`
//! - `cache_lookups_total` (counter): lookups by `result` (hit, miss)
//! - `cache_evictions_total` (counter): removals by `reason` (capacity, expired)
//! - `cache_entries` (gauge): live entries after the last sweep
//! - `limiter_in_flight` (gauge): permits currently held
//! - `limiter_timeouts_total` (counter): acquisitions that timed out
//! - `breaker_transitions_total` (counter): transitions by `circuit`, `to`
//! - `breaker_state` (gauge): 0=closed, 1=open, 2=half-open, by `circuit`
//! - `validation_rejections_total` (counter): rejections by `rule`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users and tests need no setup
//! - Label values are bounded sets (rule ids, circuit names), never keys

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

/// Record one finished gateway operation.
pub fn record_operation(op: &'static str, outcome: &'static str, start: Instant) {
    counter!("gateway_operations_total", "op" => op, "outcome" => outcome).increment(1);
    histogram!("gateway_operation_duration_seconds", "op" => op)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_eviction(reason: &'static str) {
    counter!("cache_evictions_total", "reason" => reason).increment(1);
}

pub fn record_cache_entries(entries: usize) {
    gauge!("cache_entries").set(entries as f64);
}

pub fn record_limiter_in_flight(in_flight: usize) {
    gauge!("limiter_in_flight").set(in_flight as f64);
}

pub fn record_limiter_timeout() {
    counter!("limiter_timeouts_total").increment(1);
}

pub fn record_breaker_transition(circuit: &str, to: &'static str) {
    counter!("breaker_transitions_total", "circuit" => circuit.to_string(), "to" => to).increment(1);
}

pub fn record_breaker_state(circuit: &str, state: f64) {
    gauge!("breaker_state", "circuit" => circuit.to_string()).set(state);
}

pub fn record_validation_rejection(rule: &str) {
    counter!("validation_rejections_total", "rule" => rule.to_string()).increment(1);
}
