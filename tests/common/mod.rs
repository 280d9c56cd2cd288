//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foundation_gateway::config::GatewayConfig;
use foundation_gateway::datetime::ManualClock;
use foundation_gateway::gateway::{DataGateway, Database, DbError, MemoryDatabase, WriteAck};
use foundation_gateway::Document;

/// What the scripted database does for one call.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    /// `None` delegates to the backing in-memory store.
    pub error: Option<DbError>,
}

impl Step {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            error: None,
        }
    }

    pub fn fail(error: DbError) -> Self {
        Self {
            delay: Duration::ZERO,
            error: Some(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = Box<dyn Fn(u32) -> Step + Send + Sync>;

/// A programmable mock database.
///
/// Every call asks the script (given the 0-based call index) how long to
/// take and whether to fail. Tracks how many calls ran concurrently.
pub struct ScriptedDatabase {
    script: Script,
    store: MemoryDatabase,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedDatabase {
    pub fn new(script: impl Fn(u32) -> Step + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            store: MemoryDatabase::new(),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(|_| Step::ok())
    }

    pub fn slow(delay: Duration) -> Self {
        Self::new(move |_| Step::ok().after(delay))
    }

    pub fn always_failing(delay: Duration) -> Self {
        Self::new(move |_| Step::fail(DbError::Connection("connection refused".into())).after(delay))
    }

    /// Fails until `healthy` is set, then serves from the store after `delay`.
    pub fn switchable(healthy: Arc<AtomicBool>, delay: Duration) -> Self {
        Self::new(move |_| {
            if healthy.load(Ordering::SeqCst) {
                Step::ok().after(delay)
            } else {
                Step::fail(DbError::Connection("connection refused".into())).after(delay)
            }
        })
    }

    /// Replace the backing store with one holding `documents`.
    pub fn with_documents<const N: usize>(mut self, documents: [(&str, Document); N]) -> Self {
        self.store = MemoryDatabase::with_documents(documents);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn run(&self) -> Result<(), DbError> {
        let step = (self.script)(self.calls.fetch_add(1, Ordering::SeqCst));
        let _guard = InFlight::enter(self);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        match step.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn fetch(&self, key: &str) -> Result<Document, DbError> {
        self.run().await?;
        self.store.fetch(key).await
    }

    async fn write(&self, key: &str, value: Document) -> Result<WriteAck, DbError> {
        self.run().await?;
        self.store.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), DbError> {
        self.run().await?;
        self.store.delete(key).await
    }
}

struct InFlight<'a>(&'a ScriptedDatabase);

impl<'a> InFlight<'a> {
    fn enter(db: &'a ScriptedDatabase) -> Self {
        let now = db.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        db.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(db)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Small, fast configuration for tests.
pub fn test_config(max_concurrency: usize, failure_threshold: u32, open_duration: Duration) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.limiter.max_concurrency = max_concurrency;
    config.limiter.acquire_timeout_ms = 2_000;
    config.breaker.failure_threshold = failure_threshold;
    config.breaker.open_duration_ms = open_duration.as_millis() as u64;
    config.cache.capacity = 1_024;
    config.cache.shards = 8;
    config.cache.sweep_interval_ms = 0;
    config
}

/// Gateway over `db` with a manual clock for breaker and cache time.
pub fn gateway_with<D: Database + 'static>(
    db: Arc<D>,
    config: &GatewayConfig,
) -> (Arc<DataGateway>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let gateway = DataGateway::from_config(config, db, clock.clone()).expect("valid rules");
    (Arc::new(gateway), clock)
}
