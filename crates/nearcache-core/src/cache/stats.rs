use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lock-free counters owned by one store.
#[derive(Debug)]
pub(crate) struct StoreCounters {
    created_at: DateTime<Utc>,
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) expirations: AtomicU64,
    pub(crate) stale_reads: AtomicU64,
    pub(crate) invalidations: AtomicU64,
    pub(crate) invalidation_requests: AtomicU64,
    /// Unix millis of the last eviction pass, 0 if none ran yet.
    last_eviction_ms: AtomicI64,
    last_expiry_sweep_ms: AtomicI64,
}

impl Default for StoreCounters {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            invalidation_requests: AtomicU64::new(0),
            last_eviction_ms: AtomicI64::new(0),
            last_expiry_sweep_ms: AtomicI64::new(0),
        }
    }
}

impl StoreCounters {
    #[inline]
    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn mark_eviction(&self) {
        self.last_eviction_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn mark_expiry_sweep(&self) {
        self.last_expiry_sweep_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, name: &str, entry_count: usize) -> NearCacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let timestamp = |millis: &AtomicI64| match millis.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        };

        NearCacheStats {
            name: name.to_string(),
            created_at: self.created_at,
            entry_count,
            hits: load(&self.hits),
            misses: load(&self.misses),
            evictions: load(&self.evictions),
            expirations: load(&self.expirations),
            stale_reads: load(&self.stale_reads),
            invalidations: load(&self.invalidations),
            invalidation_requests: load(&self.invalidation_requests),
            last_eviction: timestamp(&self.last_eviction_ms),
            last_expiry_sweep: timestamp(&self.last_expiry_sweep_ms),
        }
    }
}

/// Point-in-time statistics of one near cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearCacheStats {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries removed for exceeding their TTL or idle limit.
    pub expirations: u64,
    /// Reads that found an entry invalidated by partition metadata.
    pub stale_reads: u64,
    /// Entries removed by invalidation events.
    pub invalidations: u64,
    /// Invalidation events received, including ones for keys not cached.
    pub invalidation_requests: u64,
    pub last_eviction: Option<DateTime<Utc>>,
    pub last_expiry_sweep: Option<DateTime<Utc>>,
}

impl NearCacheStats {
    /// Hits divided by lookups, `0.0` before the first lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
