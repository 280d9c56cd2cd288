//! Data access gateway.
//!
//! # Responsibilities
//! - Compose validator, cache, limiter and circuit breaker around one database
//! - Classify every failure so callers can pick a retry strategy
//! - Report health for operational tooling
//!
//! # Data Flow
//! ```text
//! read(key):
//!     validate key → cache lookup (hit returns) → fill token → acquire permit
//!     → breaker(deadline(db.fetch)) → cache fill (dropped if invalidated) → permit dropped
//!
//! write(key, doc) / delete(key):
//!     validate key (+ document) → acquire permit
//!     → breaker(deadline(db.write|delete)) → cache invalidate → permit dropped
//! ```
//!
//! # Design Decisions
//! - Invalidate on write, never write-through: the cache is read-mostly
//! - A read only caches what it fetched if no invalidation hit the key's shard
//!   meanwhile, so a completed write is never followed by a stale cached read
//! - Once a mutation reaches the database its outcome is unknown until it
//!   answers; timeouts and dropped futures both invalidate
//! - Cache problems degrade to a miss or a logged warning, never an error
//! - The permit is a scoped guard, so every early return releases it
//! - No retries here; see `resilience::retries` for the caller-side helper

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::cache::{FillToken, Lookup, ShardedCache};
use crate::config::schema::GatewayConfig;
use crate::datetime::Clock;
use crate::gateway::database::{Database, DbError, WriteAck};
use crate::gateway::error::GatewayError;
use crate::gateway::health::{GatewayHealth, HealthStatus};
use crate::observability::{metrics, spans};
use crate::resilience::{with_deadline, CircuitBreaker, CircuitError, ConcurrencyLimiter};
use crate::security::{InputValidator, Payload, RuleError, RuleSet};
use crate::Document;

/// Per-operation timing and caching policy.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub default_ttl: Duration,
    /// `Some` enables caching of not-found results for this long.
    pub negative_ttl: Option<Duration>,
    pub acquire_timeout: Duration,
    pub operation_timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            default_ttl: config.cache.default_ttl(),
            negative_ttl: config.cache.negative_ttl(),
            acquire_timeout: config.limiter.acquire_timeout(),
            operation_timeout: config.timeouts.operation(),
        }
    }
}

/// Reliability layer in front of a document database.
pub struct DataGateway {
    validator: Arc<InputValidator>,
    cache: Arc<ShardedCache>,
    limiter: Arc<ConcurrencyLimiter>,
    breaker: Arc<CircuitBreaker>,
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    settings: GatewaySettings,
}

impl std::fmt::Debug for DataGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGateway")
            .field("breaker", &self.breaker.name())
            .field("limiter", &self.limiter.max_concurrency())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DataGateway {
    /// Assemble a gateway from already-constructed parts.
    pub fn new(
        validator: Arc<InputValidator>,
        cache: Arc<ShardedCache>,
        limiter: Arc<ConcurrencyLimiter>,
        breaker: Arc<CircuitBreaker>,
        database: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            validator,
            cache,
            limiter,
            breaker,
            database,
            clock,
            settings,
        }
    }

    /// Build every part from a validated configuration.
    pub fn from_config(
        config: &GatewayConfig,
        database: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuleError> {
        let rules = RuleSet::from_config(&config.validator)?;
        Ok(Self::new(
            Arc::new(InputValidator::new(rules)),
            Arc::new(ShardedCache::new(&config.cache, clock.clone())),
            Arc::new(ConcurrencyLimiter::from_config(&config.limiter)),
            Arc::new(CircuitBreaker::from_config(&config.breaker, clock.clone())),
            database,
            clock,
            GatewaySettings::from_config(config),
        ))
    }

    /// Read the document under `key`, from cache when possible.
    pub async fn read(&self, key: &str) -> Result<Document, GatewayError> {
        let start = Instant::now();
        let result = self
            .read_inner(key)
            .instrument(spans::operation_span("read", key))
            .await;
        record("read", &result, start);
        result
    }

    /// Store `value` under `key` and invalidate its cache entry.
    pub async fn write(&self, key: &str, value: Document) -> Result<WriteAck, GatewayError> {
        let start = Instant::now();
        let result = self
            .write_inner(key, value)
            .instrument(spans::operation_span("write", key))
            .await;
        record("write", &result, start);
        result
    }

    /// Remove the document under `key` and invalidate its cache entry.
    pub async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        let start = Instant::now();
        let result = self
            .delete_inner(key)
            .instrument(spans::operation_span("delete", key))
            .await;
        record("delete", &result, start);
        result
    }

    /// Breaker state, limiter utilization and cache statistics.
    pub fn health(&self) -> GatewayHealth {
        let breaker = self.breaker.snapshot();
        let limiter = self.limiter.snapshot();
        GatewayHealth {
            status: HealthStatus::assess(&breaker, &limiter),
            checked_at: self.clock.now(),
            breaker,
            limiter,
            cache: self.cache.stats(),
        }
    }

    /// Swap in a new validator rule set. In-flight validations are unaffected.
    pub fn reload_validator_rules(&self, rules: RuleSet) {
        self.validator.reload_rules(rules);
    }

    pub fn validator(&self) -> &Arc<InputValidator> {
        &self.validator
    }

    pub fn cache(&self) -> &Arc<ShardedCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    async fn read_inner(&self, key: &str) -> Result<Document, GatewayError> {
        self.validator.validate_key(key)?;

        match self.cache.lookup(key) {
            Lookup::Hit(doc) => {
                tracing::debug!("Served from cache");
                return Ok(doc);
            }
            Lookup::Absent => {
                tracing::debug!("Served negative entry from cache");
                return Err(GatewayError::NotFound {
                    key: key.to_string(),
                });
            }
            Lookup::Miss => {}
        }

        // Taken before the fetch so a write finishing mid-fetch fences this fill.
        let token = self.cache.fill_token(key);
        let _permit = self.limiter.acquire(self.settings.acquire_timeout).await?;
        let deadline = self.settings.operation_timeout;
        let result = self
            .breaker
            .call_with(
                || with_deadline(deadline, self.database.fetch(key), DbError::Timeout),
                DbError::counts_as_failure,
            )
            .await;

        match result {
            Ok(doc) => {
                self.fill_cache(token, key, Some(doc.clone()), self.settings.default_ttl);
                Ok(doc)
            }
            Err(CircuitError::Execution(DbError::NotFound(missing))) => {
                if let Some(ttl) = self.settings.negative_ttl {
                    self.fill_cache(token, key, None, ttl);
                }
                Err(GatewayError::NotFound { key: missing })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_inner(&self, key: &str, value: Document) -> Result<WriteAck, GatewayError> {
        self.validator.validate_key(key)?;
        let document = self.validator.validate(Payload::from(value))?.to_json();

        let _permit = self.limiter.acquire(self.settings.acquire_timeout).await?;
        let invalidation = Invalidation::armed(&self.cache, key);
        let deadline = self.settings.operation_timeout;
        let result = self
            .breaker
            .call_with(
                || with_deadline(deadline, self.database.write(key, document), DbError::Timeout),
                DbError::counts_as_failure,
            )
            .await;

        // A timed-out write may still have been applied.
        if !matches!(result, Ok(_) | Err(CircuitError::Execution(DbError::Timeout(_)))) {
            invalidation.disarm();
        }
        let ack = result?;
        tracing::debug!(version = ack.version, "Write acknowledged");
        Ok(ack)
    }

    async fn delete_inner(&self, key: &str) -> Result<(), GatewayError> {
        self.validator.validate_key(key)?;

        let _permit = self.limiter.acquire(self.settings.acquire_timeout).await?;
        let invalidation = Invalidation::armed(&self.cache, key);
        let deadline = self.settings.operation_timeout;
        let result = self
            .breaker
            .call_with(
                || with_deadline(deadline, self.database.delete(key), DbError::Timeout),
                DbError::counts_as_failure,
            )
            .await;

        if !matches!(
            result,
            Ok(_) | Err(CircuitError::Execution(DbError::NotFound(_) | DbError::Timeout(_)))
        ) {
            invalidation.disarm();
        }
        result.map_err(GatewayError::from)
    }

    fn fill_cache(&self, token: Option<FillToken>, key: &str, value: Option<Document>, ttl: Duration) {
        let Some(token) = token else {
            return;
        };
        match self.cache.fill(token, key, value, ttl) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Key invalidated during fetch, result not cached"),
            Err(e) => tracing::warn!(error = %e, "Failed to populate cache"),
        }
    }
}

/// Invalidates a key when dropped unless disarmed.
///
/// Armed before a mutation reaches the database, so a caller that drops the
/// operation mid-flight still clears what may now be stale.
struct Invalidation<'a> {
    cache: &'a ShardedCache,
    key: &'a str,
    armed: bool,
}

impl<'a> Invalidation<'a> {
    fn armed(cache: &'a ShardedCache, key: &'a str) -> Self {
        Self {
            cache,
            key,
            armed: true,
        }
    }

    /// The database definitely did not apply the mutation.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Invalidation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.invalidate(self.key);
        }
    }
}

fn record<T>(op: &'static str, result: &Result<T, GatewayError>, start: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => {
            tracing::debug!(op, kind = e.kind().as_str(), error = %e, "Operation failed");
            e.outcome()
        }
    };
    metrics::record_operation(op, outcome, start);
}
