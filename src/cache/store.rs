//! Sharded LRU cache with per-entry TTL.
//!
//! # Responsibilities
//! - Hold recently read documents keyed by lookup key
//! - Expire entries on read once their TTL has elapsed
//! - Evict the least recently used entry when a shard is full
//! - Degrade to "miss" on any internal failure
//!
//! # Design Decisions
//! - Keyspace partitioned by hash into independently locked shards
//! - Shard locks are held for O(log n) bookkeeping only, never across I/O
//! - Callers always receive clones; entries never leave the shard by reference
//! - Recency is ordered by `(last access tick, insertion sequence)`, so among
//!   equally recent candidates the earliest inserted entry is evicted first
//! - A poisoned shard is cleared and treated as empty
//! - Each shard counts invalidations; a fill taken out before a database
//!   fetch is dropped if an invalidation landed in its shard since, so a slow
//!   read can never re-cache a value a completed write has replaced

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::shard::ShardSelector;
use crate::config::schema::CacheConfig;
use crate::datetime::{Clock, UtcInstant};
use crate::observability::metrics;
use crate::Document;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A live entry.
    Hit(Document),
    /// A live negative entry: the key is known not to exist.
    Absent,
    /// Nothing usable cached.
    Miss,
}

/// Errors from cache writes. Never surfaced to gateway callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache shard {0} is unavailable")]
    ShardUnavailable(usize),
}

/// Proof of which invalidation generation a cache fill was planned under.
///
/// Take it with [`ShardedCache::fill_token`] before fetching from the
/// database and hand it back to [`ShardedCache::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken {
    shard: usize,
    generation: u64,
}

/// A cached value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// `None` marks a negative entry.
    pub value: Option<Document>,
    pub created_at: UtcInstant,
    pub ttl: Duration,
    /// Approximate size in bytes (key + value).
    pub size: usize,
    last_access: u64,
    inserted: u64,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: UtcInstant) -> bool {
        now.elapsed_since(self.created_at) >= self.ttl
    }

    fn recency_key(&self) -> (u64, u64) {
        (self.last_access, self.inserted)
    }
}

/// Counters exposed through `CacheStats`.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    insertions: AtomicU64,
    invalidations: AtomicU64,
    stale_fills: AtomicU64,
    degraded: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub shards: usize,
    pub entries: usize,
    pub approximate_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub insertions: u64,
    pub invalidations: u64,
    /// Fills dropped because the key's shard was invalidated mid-fetch.
    pub stale_fills: u64,
    pub degraded: u64,
}

#[derive(Debug)]
struct Shard {
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<(u64, u64), String>,
    capacity: usize,
    tick: u64,
    bytes: usize,
    /// Bumped by every invalidation and clear.
    generation: u64,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            capacity: capacity.max(1),
            tick: 0,
            bytes: 0,
            generation: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency_key());
        self.bytes = self.bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn lookup(&mut self, key: &str, now: UtcInstant, counters: &Counters) -> Lookup {
        let expired = match self.entries.get(key) {
            None => return Lookup::Miss,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.remove(key);
            counters.expirations.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_eviction("expired");
            return Lookup::Miss;
        }

        let tick = self.next_tick();
        let Some(entry) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        let old = entry.recency_key();
        entry.last_access = tick;
        let new = entry.recency_key();
        let value = entry.value.clone();
        self.recency.remove(&old);
        self.recency.insert(new, key.to_string());

        match value {
            Some(doc) => Lookup::Hit(doc),
            None => Lookup::Absent,
        }
    }

    /// Insert or overwrite; returns how many entries were evicted for room.
    fn insert(&mut self, key: String, mut entry: CacheEntry) -> usize {
        self.remove(&key);

        let tick = self.next_tick();
        entry.last_access = tick;
        entry.inserted = tick;
        self.bytes += entry.size;
        self.recency.insert(entry.recency_key(), key.clone());
        self.entries.insert(key, entry);

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            let Some((_, victim)) = self.recency.pop_first() else {
                break;
            };
            if let Some(old) = self.entries.remove(&victim) {
                self.bytes = self.bytes.saturating_sub(old.size);
                evicted += 1;
            }
        }
        evicted
    }

    fn purge_expired(&mut self, now: UtcInstant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.bytes = 0;
        self.generation += 1;
    }
}

/// The cache manager: a fixed-capacity, sharded, TTL + LRU key-value store.
#[derive(Debug)]
pub struct ShardedCache {
    shards: Vec<Mutex<Shard>>,
    selector: ShardSelector,
    capacity: usize,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ShardedCache {
    /// Build from configuration.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(config.capacity, config.shards, clock)
    }

    /// Build with an explicit capacity and shard count.
    ///
    /// The shard count is clamped to `[1, capacity]` so every shard can hold an entry.
    pub fn with_capacity(capacity: usize, shards: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let selector = ShardSelector::new(shards.min(capacity), 0x5eed_cafe);
        let shards = selector
            .split_capacity(capacity)
            .into_iter()
            .map(|cap| Mutex::new(Shard::new(cap)))
            .collect();
        Self {
            shards,
            selector,
            capacity,
            clock,
            counters: Counters::default(),
        }
    }

    /// Fetch a live value. Negative entries and misses both return `None`.
    pub fn get(&self, key: &str) -> Option<Document> {
        match self.lookup(key) {
            Lookup::Hit(doc) => Some(doc),
            Lookup::Absent | Lookup::Miss => None,
        }
    }

    /// Fetch with the distinction between a negative entry and a miss.
    pub fn lookup(&self, key: &str) -> Lookup {
        let now = self.clock.now();
        let result = self
            .with_shard(key, |shard, counters| shard.lookup(key, now, counters))
            .unwrap_or(Lookup::Miss);

        match &result {
            Lookup::Hit(_) | Lookup::Absent => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("hit");
                tracing::trace!(key = %key, "Cache hit");
            }
            Lookup::Miss => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("miss");
                tracing::trace!(key = %key, "Cache miss");
            }
        }
        result
    }

    /// Store `value` under `key` for `ttl`. Overwrites value, TTL and recency.
    ///
    /// A zero TTL stores nothing.
    pub fn put(&self, key: impl Into<String>, value: Document, ttl: Duration) -> Result<(), CacheError> {
        self.store(key.into(), Some(value), ttl, None).map(|_| ())
    }

    /// Record that `key` does not exist, for `ttl`.
    pub fn put_absent(&self, key: impl Into<String>, ttl: Duration) -> Result<(), CacheError> {
        self.store(key.into(), None, ttl, None).map(|_| ())
    }

    /// Current invalidation generation of `key`'s shard.
    ///
    /// `None` when the shard is unavailable; the caller should skip caching.
    pub fn fill_token(&self, key: &str) -> Option<FillToken> {
        let shard = self.selector.shard_for_key(key);
        self.with_shard_index(shard, |s, _| s.generation)
            .map(|generation| FillToken { shard, generation })
    }

    /// Cache a value read from the database under `token`.
    ///
    /// `value` of `None` stores a negative entry. Returns `Ok(false)` without
    /// storing when the shard has been invalidated since the token was taken.
    pub fn fill(
        &self,
        token: FillToken,
        key: impl Into<String>,
        value: Option<Document>,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.store(key.into(), value, ttl, Some(token))
    }

    fn store(
        &self,
        key: String,
        value: Option<Document>,
        ttl: Duration,
        token: Option<FillToken>,
    ) -> Result<bool, CacheError> {
        if ttl.is_zero() {
            return Ok(false);
        }
        let size = key.len() + value.as_ref().map(approximate_size).unwrap_or(0);
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl,
            size,
            last_access: 0,
            inserted: 0,
        };

        let index = self.selector.shard_for_key(key.as_str());
        let stored = self
            .with_shard_index(index, |shard, _| match token {
                Some(t) if t.shard != index || t.generation != shard.generation => None,
                _ => Some(shard.insert(key, entry)),
            })
            .ok_or(CacheError::ShardUnavailable(index))?;
        let Some(evicted) = stored else {
            self.counters.stale_fills.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        };

        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            for _ in 0..evicted {
                metrics::record_cache_eviction("capacity");
            }
        }
        Ok(true)
    }

    /// Drop the entry for `key`. Returns whether one existed.
    ///
    /// Fills in flight for the same shard are dropped even when nothing was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self
            .with_shard(key, |shard, _| {
                shard.generation += 1;
                shard.remove(key).is_some()
            })
            .unwrap_or(false);
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "Cache entry invalidated");
        }
        removed
    }

    /// Proactively remove every expired entry. Locks one shard at a time.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        for index in 0..self.shards.len() {
            purged += self
                .with_shard_index(index, |shard, _| shard.purge_expired(now))
                .unwrap_or(0);
        }
        if purged > 0 {
            self.counters
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            for _ in 0..purged {
                metrics::record_cache_eviction("expired");
            }
        }
        purged
    }

    /// Remove everything. Counters are kept.
    pub fn clear(&self) {
        for index in 0..self.shards.len() {
            let _ = self.with_shard_index(index, |shard, _| shard.clear());
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .filter_map(|index| self.with_shard_index(index, |shard, _| shard.entries.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Snapshot of sizes and counters.
    pub fn stats(&self) -> CacheStats {
        let (entries, approximate_bytes) = (0..self.shards.len())
            .filter_map(|index| {
                self.with_shard_index(index, |shard, _| (shard.entries.len(), shard.bytes))
            })
            .fold((0, 0), |(e, b), (se, sb)| (e + se, b + sb));

        CacheStats {
            capacity: self.capacity,
            shards: self.shards.len(),
            entries,
            approximate_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            stale_fills: self.counters.stale_fills.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
        }
    }

    fn with_shard<R>(&self, key: &str, f: impl FnOnce(&mut Shard, &Counters) -> R) -> Option<R> {
        self.with_shard_index(self.selector.shard_for_key(key), f)
    }

    fn with_shard_index<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut Shard, &Counters) -> R,
    ) -> Option<R> {
        let mut guard = self.lock_shard(index)?;
        Some(f(&mut guard, &self.counters))
    }

    fn lock_shard(&self, index: usize) -> Option<MutexGuard<'_, Shard>> {
        let mutex = self.shards.get(index)?;
        match mutex.lock() {
            Ok(guard) => Some(guard),
            Err(poisoned) => {
                // A writer panicked mid-update; the shard's contents can't be trusted.
                tracing::warn!(shard = index, "Cache shard poisoned, clearing it");
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                poisoned.into_inner().clear();
                mutex.clear_poison();
                None
            }
        }
    }
}

/// Rough in-memory footprint of a document.
pub fn approximate_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(approximate_size).sum::<usize>() + 8,
        Value::Object(fields) => {
            fields
                .iter()
                .map(|(k, v)| k.len() + approximate_size(v))
                .sum::<usize>()
                + 8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::ManualClock;
    use proptest::prelude::*;
    use serde_json::json;

    fn cache(capacity: usize, shards: usize) -> (ShardedCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (ShardedCache::with_capacity(capacity, shards, clock.clone()), clock)
    }

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_put_then_get() {
        let (cache, _) = cache(8, 2);
        cache.put("sku-42", json!({"price": 10}), TTL).unwrap();
        assert_eq!(cache.get("sku-42"), Some(json!({"price": 10})));
        assert_eq!(cache.get("sku-43"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let (cache, clock) = cache(8, 1);
        cache.put("k", json!(1), TTL).unwrap();

        clock.advance(TTL - Duration::from_millis(1));
        assert_eq!(cache.get("k"), Some(json!(1)));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0, "expired entry removed on read");
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_overwrite_resets_value_and_ttl() {
        let (cache, clock) = cache(8, 1);
        cache.put("k", json!("old"), TTL).unwrap();
        clock.advance(Duration::from_secs(8));
        cache.put("k", json!("new"), Duration::from_secs(5)).unwrap();

        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.get("k"), Some(json!("new")));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_lru_eviction_order() {
        let (cache, _) = cache(3, 1);
        cache.put("a", json!(1), TTL).unwrap();
        cache.put("b", json!(2), TTL).unwrap();
        cache.put("c", json!(3), TTL).unwrap();

        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").is_some());
        cache.put("d", json!(4), TTL).unwrap();

        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_untouched_entries_evicted_in_insertion_order() {
        let (cache, _) = cache(2, 1);
        cache.put("first", json!(1), TTL).unwrap();
        cache.put("second", json!(2), TTL).unwrap();
        cache.put("third", json!(3), TTL).unwrap();
        assert_eq!(cache.get("first"), None);
        assert!(cache.get("second").is_some());
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let (cache, _) = cache(2, 1);
        cache.put("a", json!(1), TTL).unwrap();
        cache.put("b", json!(2), TTL).unwrap();
        cache.put("a", json!(10), TTL).unwrap();
        cache.put("c", json!(3), TTL).unwrap();
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(json!(10)));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let (cache, _) = cache(16, 4);
        for i in 0..500 {
            cache.put(format!("key-{}", i), json!(i), TTL).unwrap();
            assert!(cache.len() <= 16);
        }
    }

    #[test]
    fn test_invalidate() {
        let (cache, _) = cache(4, 1);
        cache.put("k", json!(1), TTL).unwrap();
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_fill_dropped_after_invalidation() {
        let (cache, _) = cache(4, 1);
        cache.put("k", json!("old"), TTL).unwrap();

        // A read misses, takes a token, and fetches; a write lands meanwhile.
        let token = cache.fill_token("k").unwrap();
        cache.invalidate("k");
        assert_eq!(cache.fill(token, "k", Some(json!("old")), TTL), Ok(false));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().stale_fills, 1);

        let token = cache.fill_token("k").unwrap();
        assert_eq!(cache.fill(token, "k", Some(json!("new")), TTL), Ok(true));
        assert_eq!(cache.get("k"), Some(json!("new")));
    }

    #[test]
    fn test_invalidating_uncached_key_still_fences_fills() {
        let (cache, _) = cache(4, 1);
        let token = cache.fill_token("k").unwrap();
        assert!(!cache.invalidate("k"));
        assert_eq!(cache.fill(token, "k", None, TTL), Ok(false));
        assert_eq!(cache.lookup("k"), Lookup::Miss);

        let token = cache.fill_token("k").unwrap();
        cache.clear();
        assert_eq!(cache.fill(token, "k", Some(json!(1)), TTL), Ok(false));
    }

    #[test]
    fn test_negative_entries() {
        let (cache, clock) = cache(4, 1);
        cache.put_absent("gone", Duration::from_secs(1)).unwrap();
        assert_eq!(cache.lookup("gone"), Lookup::Absent);
        assert_eq!(cache.get("gone"), None);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.lookup("gone"), Lookup::Miss);
    }

    #[test]
    fn test_zero_ttl_not_stored() {
        let (cache, _) = cache(4, 1);
        cache.put("k", json!(1), Duration::ZERO).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache(8, 2);
        cache.put("short", json!(1), Duration::from_secs(1)).unwrap();
        cache.put("long", json!(2), Duration::from_secs(60)).unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn test_callers_get_copies() {
        let (cache, _) = cache(4, 1);
        cache.put("k", json!({"qty": 1}), TTL).unwrap();
        let mut copy = cache.get("k").unwrap();
        copy["qty"] = json!(99);
        assert_eq!(cache.get("k"), Some(json!({"qty": 1})));
    }

    #[test]
    fn test_shards_clamped_to_capacity() {
        let (cache, _) = cache(2, 16);
        assert_eq!(cache.shard_count(), 2);
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn test_poisoned_shard_degrades_to_miss() {
        let (cache, _) = cache(4, 1);
        cache.put("k", json!(1), TTL).unwrap();

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cache.shards[0].lock().unwrap();
            panic!("writer crashed");
        }));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().degraded, 1);

        // The shard is usable again afterwards.
        cache.put("k", json!(2), TTL).unwrap();
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[test]
    fn test_concurrent_disjoint_keys() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let cache = Arc::new(ShardedCache::with_capacity(4_096, 16, clock));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("t{}-k{}", t, i);
                        cache.put(key.clone(), json!(i), TTL).unwrap();
                        assert_eq!(cache.get(&key), Some(json!(i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1_600);
    }

    proptest! {
        #[test]
        fn prop_put_get_until_ttl(key in "[a-z0-9-]{1,24}", value in any::<i64>(), ttl_ms in 1u64..100_000) {
            let (cache, clock) = cache(64, 4);
            let ttl = Duration::from_millis(ttl_ms);
            cache.put(key.clone(), json!(value), ttl).unwrap();
            prop_assert_eq!(cache.get(&key), Some(json!(value)));

            clock.advance(ttl - Duration::from_millis(1));
            if ttl_ms > 1 {
                prop_assert_eq!(cache.get(&key), Some(json!(value)));
            }
            clock.advance(Duration::from_millis(1));
            prop_assert_eq!(cache.get(&key), None);
        }
    }
}
