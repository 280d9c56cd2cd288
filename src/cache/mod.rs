//! Cache subsystem.
//!
//! # Data Flow
//! ```text
//! gateway read:
//!     → store.rs lookup (shard.rs picks the shard by key hash)
//!     → hit: clone returned, recency bumped
//!     → expired: entry dropped, treated as miss
//!
//! gateway write/delete:
//!     → store.rs invalidate
//!
//! sweeper.rs (background):
//!     → periodic purge of expired entries
//! ```
//!
//! # Design Decisions
//! - The cache is never a hard dependency: failures read as misses
//! - Read-mostly, invalidate-on-write; no cache-then-write
//! - Misses are not cached unless a negative TTL is configured

pub mod shard;
pub mod store;
pub mod sweeper;

pub use shard::ShardSelector;
pub use store::{CacheEntry, CacheError, CacheStats, FillToken, Lookup, ShardedCache};
pub use sweeper::CacheSweeper;
