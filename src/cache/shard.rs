//! Key-to-shard mapping.
//!
//! A seeded hash spreads keys across independently locked shards so that
//! operations on different keys rarely contend on the same lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic shard selector using a seeded hash.
///
/// The same `(key, seed, shards)` always maps to the same shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSelector {
    shards: usize,
    seed: u64,
}

impl ShardSelector {
    /// Selector for `shards` shards; zero is clamped to one.
    pub fn new(shards: usize, seed: u64) -> Self {
        Self {
            shards: shards.max(1),
            seed,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Map a key to a shard index in `[0, shards)`.
    pub fn shard_for_key<K: Hash + ?Sized>(&self, key: &K) -> usize {
        if self.shards == 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % self.shards as u64) as usize
    }

    /// Split `total` capacity across shards; earlier shards absorb the remainder.
    pub fn split_capacity(&self, total: usize) -> Vec<usize> {
        let base = total / self.shards;
        let extra = total % self.shards;
        (0..self.shards)
            .map(|i| base + usize::from(i < extra))
            .collect()
    }
}

impl Default for ShardSelector {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_and_in_range() {
        let selector = ShardSelector::new(8, 42);
        for i in 0..1_000 {
            let key = format!("sku-{}", i);
            let shard = selector.shard_for_key(key.as_str());
            assert!(shard < 8);
            assert_eq!(selector.shard_for_key(key.as_str()), shard);
        }
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let selector = ShardSelector::new(4, 0);
        let mut counts = [0usize; 4];
        for i in 0..4_000 {
            counts[selector.shard_for_key(format!("key-{}", i).as_str())] += 1;
        }
        for count in counts {
            assert!(count > 600, "uneven distribution: {:?}", counts);
        }
    }

    #[test]
    fn test_zero_shards_clamped() {
        let selector = ShardSelector::new(0, 0);
        assert_eq!(selector.shard_count(), 1);
        assert_eq!(selector.shard_for_key("anything"), 0);
    }

    #[test]
    fn test_split_capacity() {
        let selector = ShardSelector::new(4, 0);
        assert_eq!(selector.split_capacity(10), vec![3, 3, 2, 2]);
        assert_eq!(selector.split_capacity(10).iter().sum::<usize>(), 10);
    }
}
