use super::Partitioner;
use crate::types::PartitionId;

/// Partitioner with a fixed partition count and the cluster's hash-to-index rule.
#[derive(Debug, Clone, Copy)]
pub struct HashPartitioner {
    partition_count: usize,
}

impl HashPartitioner {
    /// Creates a partitioner. A count of zero is raised to one.
    #[must_use]
    pub fn new(partition_count: usize) -> Self {
        Self { partition_count: partition_count.max(1) }
    }
}

impl Partitioner for HashPartitioner {
    fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn partition_id(&self, partition_hash: i32) -> PartitionId {
        if partition_hash == i32::MIN {
            return 0;
        }
        partition_hash.unsigned_abs() as usize % self.partition_count
    }
}
