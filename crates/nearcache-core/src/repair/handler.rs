use super::{MetadataSnapshot, MetadataTable, RepairError};
use crate::{
    cache::CacheStore,
    cluster::{BatchInvalidation, InvalidationEvent, InvalidationHandler},
    types::{PartitionId, Token},
};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Applies invalidation events and reconciliation results to one cache.
///
/// Events remove entries from the store and advance the partition metadata. Gaps in
/// the sequence stream are counted; once the total exceeds
/// `max_tolerated_miss_count`, [`fix_sequence_gap`](Self::fix_sequence_gap) moves every
/// partition's stale watermark up so entries that may have missed an invalidation are
/// dropped on their next read.
pub struct RepairingHandler {
    name: Arc<str>,
    client_id: Uuid,
    store: Arc<CacheStore>,
    table: Arc<MetadataTable>,
    max_tolerated_miss_count: i64,
    /// Partition of map-wide events, derived from the cache name.
    name_partition: PartitionId,
}

impl RepairingHandler {
    /// Creates a handler for `store`, whose stale-read detector must be `table`.
    #[must_use]
    pub fn new(
        client_id: Uuid,
        store: Arc<CacheStore>,
        table: Arc<MetadataTable>,
        max_tolerated_miss_count: i64,
    ) -> Self {
        let name: Arc<str> = Arc::from(store.name());
        let name_partition = table.partition_for(&Token::for_name(&name));
        Self { name, client_id, store, table, max_tolerated_miss_count, name_partition }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn metadata(&self, partition_id: PartitionId) -> Option<MetadataSnapshot> {
        self.table.get(partition_id).map(|metadata| metadata.snapshot())
    }

    /// Sum of missed sequences over all partitions.
    #[must_use]
    pub fn total_missed_count(&self) -> i64 {
        self.table.iter().map(|(_, metadata)| metadata.missed_sequence_count()).sum()
    }

    /// Applies one invalidation.
    ///
    /// Events from this client only advance metadata; the local write already updated
    /// the store. A `None` key clears the whole store.
    pub fn handle(&self, key: Option<&Token>, source_id: Uuid, partition_guid: Uuid, sequence: i64) {
        if source_id != self.client_id {
            match key {
                Some(key) => {
                    self.store.invalidate(key);
                }
                None => self.store.invalidate_all(),
            }
        }

        let partition_id = key.map_or(self.name_partition, |key| self.table.partition_for(key));
        let Some(metadata) = self.table.get(partition_id) else {
            warn!(cache = %self.name, partition = partition_id, "invalidation for unknown partition");
            return;
        };

        if metadata.update_source_guid(partition_guid) {
            debug!(cache = %self.name, partition = partition_id, guid = %partition_guid, "partition source changed");
        }
        if let Some(missed) = metadata.update_sequence(sequence, false) {
            if missed > 0 {
                debug!(cache = %self.name, partition = partition_id, sequence, missed, "sequence gap observed");
            }
        }
        trace!(cache = %self.name, partition = partition_id, sequence, "invalidation applied");
    }

    /// Applies a batch of invalidations element by element.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError::BatchLengthMismatch`] if the vectors differ in length. The
    /// batch is rejected as a whole and nothing is applied.
    pub fn handle_batch(&self, batch: &BatchInvalidation) -> Result<(), RepairError> {
        let len = batch.keys.len();
        if batch.source_ids.len() != len ||
            batch.partition_guids.len() != len ||
            batch.sequences.len() != len
        {
            return Err(RepairError::BatchLengthMismatch {
                keys: len,
                source_ids: batch.source_ids.len(),
                partition_guids: batch.partition_guids.len(),
                sequences: batch.sequences.len(),
            });
        }

        for (((key, source_id), partition_guid), sequence) in batch
            .keys
            .iter()
            .zip(&batch.source_ids)
            .zip(&batch.partition_guids)
            .zip(&batch.sequences)
        {
            self.handle(Some(key), *source_id, *partition_guid, *sequence);
        }
        Ok(())
    }

    /// Seeds partition guids from a snapshot, before any event was seen.
    pub fn initialize_guids(&self, partition_guids: &[(PartitionId, Uuid)]) {
        for &(partition_id, guid) in partition_guids {
            match self.table.get(partition_id) {
                Some(metadata) => metadata.set_source_guid(guid),
                None => self.warn_unknown_partition(partition_id),
            }
        }
    }

    /// Seeds sequences from a snapshot. Only the rows for this cache are used.
    pub fn initialize_sequences(&self, name_sequences: &[(String, Vec<(PartitionId, i64)>)]) {
        for (partition_id, sequence) in self.own_sequences(name_sequences) {
            match self.table.get(partition_id) {
                Some(metadata) => metadata.set_sequence(sequence),
                None => self.warn_unknown_partition(partition_id),
            }
        }
    }

    /// Applies reconciled partition guids. A changed guid resets that partition.
    pub fn update_guids(&self, partition_guids: &[(PartitionId, Uuid)]) {
        for &(partition_id, guid) in partition_guids {
            match self.table.get(partition_id) {
                Some(metadata) => {
                    if metadata.update_source_guid(guid) {
                        debug!(cache = %self.name, partition = partition_id, guid = %guid, "partition source repaired");
                    }
                }
                None => self.warn_unknown_partition(partition_id),
            }
        }
    }

    /// Applies reconciled sequences. Every sequence step not seen as an event counts as missed.
    pub fn update_sequences(&self, name_sequences: &[(String, Vec<(PartitionId, i64)>)]) {
        for (partition_id, sequence) in self.own_sequences(name_sequences) {
            match self.table.get(partition_id) {
                Some(metadata) => {
                    if let Some(missed) = metadata.update_sequence(sequence, true) {
                        debug!(cache = %self.name, partition = partition_id, sequence, missed, "sequence repaired");
                    }
                }
                None => self.warn_unknown_partition(partition_id),
            }
        }
    }

    /// Marks possibly-stale entries once too many invalidations were missed.
    ///
    /// When the missed total exceeds the tolerated count, every partition's stale
    /// sequence is raised to its current sequence and its missed count is reset.
    /// Returns `true` if the watermarks were advanced.
    pub fn fix_sequence_gap(&self) -> bool {
        let counted: Vec<i64> =
            self.table.iter().map(|(_, metadata)| metadata.missed_sequence_count()).collect();
        let total: i64 = counted.iter().sum();
        if total <= self.max_tolerated_miss_count {
            return false;
        }

        warn!(
            cache = %self.name,
            missed = total,
            tolerated = self.max_tolerated_miss_count,
            "missed invalidations above tolerance, marking cached entries stale"
        );
        // Misses recorded after counting stay for the next pass
        for ((_, metadata), missed) in self.table.iter().zip(counted) {
            metadata.forgive_missed(missed);
            metadata.advance_stale_sequence();
        }
        true
    }

    fn own_sequences<'a>(
        &'a self,
        name_sequences: &'a [(String, Vec<(PartitionId, i64)>)],
    ) -> impl Iterator<Item = (PartitionId, i64)> + 'a {
        name_sequences
            .iter()
            .filter(move |(name, _)| **name == *self.name)
            .flat_map(|(_, sequences)| sequences.iter().copied())
    }

    fn warn_unknown_partition(&self, partition_id: PartitionId) {
        warn!(
            cache = %self.name,
            partition = partition_id,
            partition_count = self.table.len(),
            "ignoring metadata for unknown partition"
        );
    }
}

impl InvalidationHandler for RepairingHandler {
    fn on_invalidation(&self, event: InvalidationEvent) {
        self.handle(event.key.as_ref(), event.source_id, event.partition_guid, event.sequence);
    }

    fn on_batch_invalidation(&self, batch: BatchInvalidation) -> Result<(), RepairError> {
        self.handle_batch(&batch).inspect_err(|e| {
            warn!(cache = %self.name, error = %e, "rejected invalidation batch");
        })
    }
}

impl std::fmt::Debug for RepairingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairingHandler")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("partitions", &self.table.len())
            .field("max_tolerated_miss_count", &self.max_tolerated_miss_count)
            .finish_non_exhaustive()
    }
}
