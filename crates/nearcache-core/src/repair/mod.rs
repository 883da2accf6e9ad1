//! Invalidation repair: per-partition sequence tracking and stale-entry detection.
//!
//! # Protocol
//!
//! Every partition carries a source guid and a monotonically increasing invalidation
//! sequence. Entries remember both values at creation. An entry is stale when its guid no
//! longer matches the partition's, or its sequence is below the partition's stale
//! sequence.
//!
//! Lost events show up as gaps in the sequence stream and are counted per partition.
//! The manager's repair loop calls [`RepairingHandler::fix_sequence_gap`] every tick and
//! periodically reconciles sequences and guids against the cluster.

pub mod handler;
pub mod metadata;

pub use handler::RepairingHandler;
pub use metadata::{MetadataSnapshot, MetadataTable, PartitionMetadata};

use thiserror::Error;

/// Errors raised while applying invalidations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    /// The parallel vectors of a batch invalidation differ in length.
    #[error(
        "batch invalidation length mismatch: keys={keys}, source_ids={source_ids}, \
         partition_guids={partition_guids}, sequences={sequences}"
    )]
    BatchLengthMismatch { keys: usize, source_ids: usize, partition_guids: usize, sequences: usize },
}
