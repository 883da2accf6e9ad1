//! Victim selection for eviction passes.

use super::CacheEntry;
use crate::config::EvictionPolicy;
use std::{cmp::Ordering, sync::Arc};

/// Number of entries one pass removes: `percentage` of `len`, at least one.
#[must_use]
pub fn victim_count(len: usize, percentage: u32) -> usize {
    if len == 0 {
        return 0;
    }
    (len * percentage as usize / 100).max(1)
}

/// Compares two entries so that the better eviction candidate sorts first.
///
/// Ties fall back to insertion order, oldest first. `Random` and `None` treat every
/// pair as equal and keep the snapshot order.
#[must_use]
pub fn compare(policy: EvictionPolicy, a: &CacheEntry, b: &CacheEntry) -> Ordering {
    match policy {
        EvictionPolicy::Lru => {
            a.last_access().cmp(&b.last_access()).then_with(|| a.ordinal().cmp(&b.ordinal()))
        }
        EvictionPolicy::Lfu => a.hits().cmp(&b.hits()).then_with(|| a.ordinal().cmp(&b.ordinal())),
        EvictionPolicy::Random | EvictionPolicy::None => Ordering::Equal,
    }
}

/// Picks up to `count` victims from a snapshot, best candidates first.
#[must_use]
pub fn select_victims(
    policy: EvictionPolicy,
    mut snapshot: Vec<Arc<CacheEntry>>,
    count: usize,
) -> Vec<Arc<CacheEntry>> {
    if !matches!(policy, EvictionPolicy::Random | EvictionPolicy::None) {
        snapshot.sort_by(|a, b| compare(policy, a, b));
    }
    snapshot.truncate(count);
    snapshot
}
