//! Per-partition invalidation state.
//!
//! Each [`PartitionMetadata`] is updated from two directions at once: the event path
//! (one update per invalidation) and the reconciliation path (bulk updates from the
//! cluster). All updates are compare-and-swap loops on atomics so neither path ever
//! waits on the other.

use crate::{
    cache::{CacheEntry, StaleReadDetector},
    cluster::Partitioner,
    types::{PartitionId, Token},
};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use uuid::Uuid;

/// Invalidation state of one partition as seen by one cache.
#[derive(Debug, Default)]
pub struct PartitionMetadata {
    source_guid: ArcSwapOption<Uuid>,
    sequence: AtomicI64,
    stale_sequence: AtomicI64,
    missed_sequence_count: AtomicI64,
}

/// Copy of a partition's metadata at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetadataSnapshot {
    pub source_guid: Option<Uuid>,
    pub sequence: i64,
    pub stale_sequence: i64,
    pub missed_sequence_count: i64,
}

impl PartitionMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source_guid(&self) -> Option<Uuid> {
        self.source_guid.load().as_deref().copied()
    }

    #[must_use]
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stale_sequence(&self) -> i64 {
        self.stale_sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn missed_sequence_count(&self) -> i64 {
        self.missed_sequence_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot {
            source_guid: self.source_guid(),
            sequence: self.sequence(),
            stale_sequence: self.stale_sequence(),
            missed_sequence_count: self.missed_sequence_count(),
        }
    }

    /// Moves the sequence forward to `new_sequence` and records skipped events.
    ///
    /// Sequences never move backwards: an update at or below the current value is
    /// ignored. From the event stream, `delta - 1` events were skipped (the event for
    /// `new_sequence` itself was seen). From reconciliation, all `delta` were missed.
    ///
    /// Returns the number of missed events recorded, or `None` if the update was ignored.
    pub fn update_sequence(&self, new_sequence: i64, via_reconciliation: bool) -> Option<i64> {
        loop {
            let current = self.sequence.load(Ordering::Acquire);
            if current >= new_sequence {
                return None;
            }
            if self
                .sequence
                .compare_exchange(current, new_sequence, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let delta = new_sequence - current;
                let missed = if via_reconciliation { delta } else { delta - 1 };
                if missed > 0 {
                    self.missed_sequence_count.fetch_add(missed, Ordering::AcqRel);
                }
                return Some(missed.max(0));
            }
        }
    }

    /// Records the partition's current source guid.
    ///
    /// A new guid invalidates every sequence seen so far, so sequence and stale sequence
    /// restart at zero. Returns `true` if the guid changed.
    pub fn update_source_guid(&self, new_guid: Uuid) -> bool {
        let previous = self.source_guid.rcu(|current| {
            if current.as_deref() == Some(&new_guid) {
                current.clone()
            } else {
                Some(Arc::new(new_guid))
            }
        });

        if previous.as_deref() == Some(&new_guid) {
            return false;
        }
        self.sequence.store(0, Ordering::Release);
        self.stale_sequence.store(0, Ordering::Release);
        true
    }

    /// Raises the stale sequence to the current sequence.
    ///
    /// Entries stamped with an older sequence become stale on their next read.
    /// Returns `true` if the watermark moved.
    pub fn advance_stale_sequence(&self) -> bool {
        loop {
            let stale = self.stale_sequence.load(Ordering::Acquire);
            let sequence = self.sequence.load(Ordering::Acquire);
            if stale >= sequence {
                return false;
            }
            if self
                .stale_sequence
                .compare_exchange(stale, sequence, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Subtracts `count` already-handled misses from the running total.
    pub fn forgive_missed(&self, count: i64) {
        if count != 0 {
            self.missed_sequence_count.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Seeds the sequence from an authoritative snapshot, bypassing the monotonic check.
    pub fn set_sequence(&self, sequence: i64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    /// Seeds the source guid from an authoritative snapshot without resetting sequences.
    pub fn set_source_guid(&self, guid: Uuid) {
        self.source_guid.store(Some(Arc::new(guid)));
    }
}

/// Fixed-size metadata array, one slot per partition.
///
/// Shared between a cache's store (as its [`StaleReadDetector`]) and its repairing
/// handler, which writes to it.
pub struct MetadataTable {
    partitioner: Arc<dyn Partitioner>,
    partitions: Box<[PartitionMetadata]>,
}

impl MetadataTable {
    #[must_use]
    pub fn new(partitioner: Arc<dyn Partitioner>) -> Self {
        let partitions = (0..partitioner.partition_count()).map(|_| PartitionMetadata::new()).collect();
        Self { partitioner, partitions }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    #[must_use]
    pub fn get(&self, partition_id: PartitionId) -> Option<&PartitionMetadata> {
        self.partitions.get(partition_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartitionId, &PartitionMetadata)> {
        self.partitions.iter().enumerate()
    }

    /// Partition owning `token`.
    #[must_use]
    pub fn partition_for(&self, token: &Token) -> PartitionId {
        self.partitioner.partition_for(token)
    }
}

impl StaleReadDetector for MetadataTable {
    fn init_entry(&self, entry: &mut CacheEntry) {
        let partition_id = self.partition_for(entry.key());
        if let Some(metadata) = self.get(partition_id) {
            entry.set_invalidation_metadata(
                partition_id,
                metadata.sequence(),
                metadata.source_guid(),
            );
        }
    }

    fn is_stale_read(&self, entry: &CacheEntry) -> bool {
        let Some(metadata) = entry.partition_id().and_then(|id| self.get(id)) else {
            return false;
        };
        entry.source_guid() != metadata.source_guid() ||
            entry.sequence() < metadata.stale_sequence()
    }
}

impl std::fmt::Debug for MetadataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTable").field("partitions", &self.partitions.len()).finish()
    }
}
