use super::CacheEntry;

/// Decides whether a cached entry may still be served.
///
/// The store calls [`init_entry`](Self::init_entry) once before publishing a new entry
/// and [`is_stale_read`](Self::is_stale_read) on every read. Caches with invalidation
/// enabled use the partition metadata table; others use [`NeverStale`].
pub trait StaleReadDetector: Send + Sync {
    /// Stamps a new entry with the current partition state.
    fn init_entry(&self, entry: &mut CacheEntry);

    /// Whether the entry was created before an invalidation it may have missed.
    fn is_stale_read(&self, entry: &CacheEntry) -> bool;
}

/// Detector for caches that do not track invalidations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStale;

impl StaleReadDetector for NeverStale {
    fn init_entry(&self, _entry: &mut CacheEntry) {}

    fn is_stale_read(&self, _entry: &CacheEntry) -> bool {
        false
    }
}
