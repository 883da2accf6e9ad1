//! Entry storage for near caches.
//!
//! # Components
//!
//! - [`CacheStore`]: concurrent keyed store with expiry, eviction and single-flight fetches
//! - [`CacheEntry`]: one cached value plus its hit and invalidation bookkeeping
//! - [`StaleReadDetector`]: per-read validity hook, wired to partition metadata by the
//!   repair layer
//! - [`NearCache`]: typed façade encoding keys and values through a [`Codec`](crate::codec::Codec)
//! - [`NearCacheStats`]: counters snapshot
//!
//! Reads never block on repair or reconciliation. Stale, expired and idle entries are
//! removed on the read that finds them, and all of them surface as plain misses.

pub mod entry;
pub mod eviction;
pub mod fetch_guard;
pub mod near_cache;
pub mod stale;
pub mod stats;
pub mod store;

#[cfg(test)]
mod tests;

pub use entry::{CacheEntry, CachedValue};
pub use fetch_guard::{FetchGuard, InflightFetch};
pub use near_cache::{NearCache, NearCacheError};
pub use stale::{NeverStale, StaleReadDetector};
pub use stats::NearCacheStats;
pub use store::CacheStore;
