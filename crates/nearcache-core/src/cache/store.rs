//! The concurrent key/value store behind every near cache.
//!
//! # Concurrency
//!
//! Entries live in a sharded `DashMap` and are shared as `Arc<CacheEntry>`, so a read
//! clones the `Arc` and releases the shard before any further work. Nothing here holds a
//! map reference across a call that may touch another shard (`len`, `iter`, eviction).
//!
//! Eviction and expiry sweeps are single-flight: an `AtomicBool` claimed with
//! `compare_exchange` lets one caller run the pass while the others skip it.
//!
//! # Staleness
//!
//! Every new entry is stamped by the store's [`StaleReadDetector`], and every read asks
//! the detector whether the stamp is still valid. A stale entry is removed and reported
//! as a miss.

use super::{
    eviction,
    fetch_guard::{FetchGuard, InflightMap},
    stats::{NearCacheStats, StoreCounters},
    CacheEntry, CachedValue, NeverStale, StaleReadDetector,
};
use crate::{
    config::{EvictionPolicy, NearCacheOptions},
    types::Token,
};
use ahash::RandomState;
use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::time::Instant;
use tracing::debug;

#[cfg(feature = "verbose-logging")]
use tracing::trace;

/// Resets a single-flight flag when the pass holding it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok()?;
        Some(Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keyed entry store with TTL, idle expiry, bounded size and stale-read detection.
pub struct CacheStore {
    name: Arc<str>,
    options: NearCacheOptions,
    entries: DashMap<Token, Arc<CacheEntry>, RandomState>,
    inflight: Arc<InflightMap>,
    detector: Arc<dyn StaleReadDetector>,
    counters: StoreCounters,
    evicting: AtomicBool,
    expiring: AtomicBool,
    /// Time base for the expiry throttle.
    epoch: Instant,
    last_expiry_check_ms: AtomicU64,
    next_ordinal: AtomicU64,
}

impl CacheStore {
    /// Creates a store that never reports stale reads.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, options: NearCacheOptions) -> Self {
        Self::with_detector(name, options, Arc::new(NeverStale))
    }

    /// Creates a store whose reads are checked by `detector`.
    #[must_use]
    pub fn with_detector(
        name: impl Into<Arc<str>>,
        options: NearCacheOptions,
        detector: Arc<dyn StaleReadDetector>,
    ) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::with_capacity_and_hasher(
                options.max_size.min(1024),
                RandomState::new(),
            ),
            options,
            inflight: Arc::new(DashMap::with_hasher(RandomState::new())),
            detector,
            counters: StoreCounters::default(),
            evicting: AtomicBool::new(false),
            expiring: AtomicBool::new(false),
            epoch: Instant::now(),
            last_expiry_check_ms: AtomicU64::new(0),
            next_ordinal: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &NearCacheOptions {
        &self.options
    }

    /// Number of entries currently stored, including ones not yet swept.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of keys with a fetch in progress.
    #[must_use]
    pub fn inflight_fetches(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn stats(&self) -> NearCacheStats {
        self.counters.snapshot(&self.name, self.entries.len())
    }

    /// Looks up a live entry without touching counters, hits or expiry.
    #[doc(hidden)]
    #[must_use]
    pub fn peek_entry(&self, key: &Token) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Inserts `value` under `key` unless the key is present.
    ///
    /// Returns `false` without inserting when `value` is `None`, the key already exists,
    /// or the store is full and eviction is disabled. A full store with eviction enabled
    /// runs an eviction pass first.
    pub fn try_add(&self, key: Token, value: Option<CachedValue>) -> bool {
        let Some(value) = value else {
            return false;
        };
        if !self.make_room() {
            debug!(cache = %self.name, "cache full, insert rejected");
            return false;
        }

        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let entry = self.new_entry(slot.key().clone(), value);
                slot.insert(entry);
                true
            }
        }
    }

    /// Returns the cached value for `key`, if present and still valid.
    ///
    /// Entries that are stale, expired or idle are removed and reported as misses.
    /// With `hit` set, a successful read counts a hit and refreshes the entry's
    /// last-hit time.
    pub fn try_get(&self, key: &Token, hit: bool) -> Option<CachedValue> {
        let value = self.lookup(key, hit);
        if value.is_none() {
            StoreCounters::incr(&self.counters.misses, 1);
        }
        value
    }

    /// Returns the cached value, fetching and caching it on a miss.
    ///
    /// At most one fetch per key runs at a time; concurrent callers for the same key wait
    /// for it and then read the cached result. The returned flag is `true` when the value
    /// came from, or was placed into, the cache. A `None` fetch result is returned without
    /// being cached, and a failed fetch leaves no entry behind.
    ///
    /// When the store is full and eviction is disabled the value is fetched and returned
    /// with the flag set to `false`.
    ///
    /// # Errors
    ///
    /// Returns the fetch error unchanged.
    pub async fn try_get_or_add<F, Fut, E>(
        &self,
        key: Token,
        fetch: F,
    ) -> Result<(bool, Option<CachedValue>), E>
    where
        F: FnOnce(Token) -> Fut,
        Fut: Future<Output = Result<Option<CachedValue>, E>>,
    {
        if let Some(value) = self.try_get(&key, true) {
            return Ok((true, Some(value)));
        }

        if self.is_full() && self.options.eviction_policy == EvictionPolicy::None {
            let value = fetch(key).await?;
            return Ok((false, value));
        }

        let _guard = FetchGuard::acquire(&self.inflight, &key).await;

        // Another caller may have cached it while this one waited
        if let Some(value) = self.lookup(&key, true) {
            return Ok((true, Some(value)));
        }

        let Some(value) = fetch(key.clone()).await? else {
            return Ok((false, None));
        };
        if !self.make_room() {
            return Ok((false, Some(value)));
        }

        let value = match self.entries.entry(key) {
            Entry::Occupied(existing) => existing.get().value().clone(),
            Entry::Vacant(slot) => {
                let entry = self.new_entry(slot.key().clone(), value.clone());
                slot.insert(entry);
                value
            }
        };
        Ok((true, Some(value)))
    }

    /// Whether a live entry exists for `key`. Follows the same rules as [`Self::try_get`].
    pub fn contains_key(&self, key: &Token, hit: bool) -> bool {
        self.try_get(key, hit).is_some()
    }

    /// Removes `key`. Returns whether an entry was removed.
    pub fn remove(&self, key: &Token) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes `key` in response to an invalidation event.
    pub fn invalidate(&self, key: &Token) -> bool {
        StoreCounters::incr(&self.counters.invalidation_requests, 1);
        let removed = self.entries.remove(key).is_some();
        if removed {
            StoreCounters::incr(&self.counters.invalidations, 1);
        }
        removed
    }

    /// Removes every entry in response to a map-wide invalidation event.
    pub fn invalidate_all(&self) {
        StoreCounters::incr(&self.counters.invalidation_requests, 1);
        let count = self.entries.len() as u64;
        self.entries.clear();
        StoreCounters::incr(&self.counters.invalidations, count);
    }

    /// Runs an expiry sweep now, regardless of the cleanup throttle.
    ///
    /// Returns the number of entries removed, or `None` if another sweep was running.
    pub fn expire_now(&self) -> Option<usize> {
        let _pass = PassGuard::try_claim(&self.expiring)?;
        self.last_expiry_check_ms.store(self.elapsed_ms(), Ordering::Release);

        let now = Instant::now();
        let max_idle = self.options.max_idle();
        let expired: Vec<Arc<CacheEntry>> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired_at(now) || entry.is_idle_at(max_idle, now))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let removed = expired.iter().filter(|entry| self.remove_exact(entry)).count();
        StoreCounters::incr(&self.counters.expirations, removed as u64);
        self.counters.mark_expiry_sweep();

        if removed > 0 {
            debug!(cache = %self.name, removed, "expired entries swept");
        }
        Some(removed)
    }

    /// Runs an eviction pass now.
    ///
    /// Returns the number of entries evicted, or `None` if another pass was running.
    pub fn evict_now(&self) -> Option<usize> {
        let _pass = PassGuard::try_claim(&self.evicting)?;

        let snapshot: Vec<Arc<CacheEntry>> =
            self.entries.iter().map(|entry| Arc::clone(entry.value())).collect();
        let count =
            eviction::victim_count(snapshot.len(), self.options.effective_eviction_percentage());
        let victims = eviction::select_victims(self.options.eviction_policy, snapshot, count);

        let evicted = victims.iter().filter(|entry| self.remove_exact(entry)).count();
        StoreCounters::incr(&self.counters.evictions, evicted as u64);
        self.counters.mark_eviction();

        debug!(cache = %self.name, evicted, policy = ?self.options.eviction_policy, "eviction pass");
        Some(evicted)
    }

    fn lookup(&self, key: &Token, hit: bool) -> Option<CachedValue> {
        self.expire_if_due();

        let entry = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;

        if self.detector.is_stale_read(&entry) {
            if self.remove_exact(&entry) {
                StoreCounters::incr(&self.counters.stale_reads, 1);
            }
            #[cfg(feature = "verbose-logging")]
            trace!(cache = %self.name, "stale read");
            return None;
        }

        let now = Instant::now();
        if entry.is_expired_at(now) || entry.is_idle_at(self.options.max_idle(), now) {
            if self.remove_exact(&entry) {
                StoreCounters::incr(&self.counters.expirations, 1);
            }
            return None;
        }

        if hit {
            entry.notify_hit();
            StoreCounters::incr(&self.counters.hits, 1);
        }
        Some(entry.value().clone())
    }

    /// Removes `entry` only if the map still holds that exact entry.
    fn remove_exact(&self, entry: &Arc<CacheEntry>) -> bool {
        self.entries.remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry)).is_some()
    }

    fn new_entry(&self, key: Token, value: CachedValue) -> Arc<CacheEntry> {
        let mut entry = CacheEntry::new(key, value, self.options.time_to_live());
        entry.set_ordinal(self.next_ordinal.fetch_add(1, Ordering::Relaxed));
        self.detector.init_entry(&mut entry);
        Arc::new(entry)
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.options.max_size
    }

    /// Makes space for one more entry. Returns `false` if the store is full and may not evict.
    fn make_room(&self) -> bool {
        if !self.is_full() {
            return true;
        }
        if self.options.eviction_policy == EvictionPolicy::None {
            return false;
        }
        self.evict_now();
        true
    }

    /// Sweeps expired entries at most once per cleanup period.
    fn expire_if_due(&self) {
        if self.options.time_to_live().is_none() && self.options.max_idle().is_none() {
            return;
        }
        let period_ms = self.options.cleanup_period().as_millis() as u64;
        let last = self.last_expiry_check_ms.load(Ordering::Acquire);
        if self.elapsed_ms().saturating_sub(last) < period_ms {
            return;
        }
        self.expire_now();
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("count", &self.entries.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
