//! Seams to the cluster client the near cache runs inside.
//!
//! The near cache does not own connections, framing or membership tracking. It
//! consumes them through four traits:
//!
//! - [`Partitioner`]: maps a token's partition hash to a partition id
//! - [`Membership`]: lists the members that can answer metadata requests
//! - [`InvalidationSource`]: installs per-cache invalidation listeners
//! - [`MetadataSource`]: fetches authoritative per-partition sequences and guids
//!
//! [`ClusterContext`] bundles one implementation of each together with the
//! local client id, which is how locally originated events are recognized.

mod partitioner;

pub use partitioner::HashPartitioner;

use crate::{
    repair::RepairError,
    types::{MemberInfo, PartitionId, SubscriptionId, Token},
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by cluster collaborators.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// The member could not be reached.
    #[error("member {member} unreachable: {reason}")]
    MemberUnreachable { member: Uuid, reason: String },

    /// The request reached the member but failed there.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The cluster refused to install an invalidation listener.
    #[error("subscription for `{cache}` rejected: {reason}")]
    SubscriptionRejected { cache: String, reason: String },

    /// The client is shutting down.
    #[error("cluster client closed")]
    Closed,
}

/// One invalidation pushed by the cluster.
///
/// `key` is `None` for map-wide events (clear, evict-all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    pub key: Option<Token>,
    pub source_id: Uuid,
    pub partition_guid: Uuid,
    pub sequence: i64,
}

/// Several invalidations delivered as parallel vectors.
///
/// The four vectors must have equal length; see
/// [`RepairingHandler::handle_batch`](crate::repair::RepairingHandler::handle_batch).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInvalidation {
    pub keys: Vec<Token>,
    pub source_ids: Vec<Uuid>,
    pub partition_guids: Vec<Uuid>,
    pub sequences: Vec<i64>,
}

/// Authoritative invalidation state reported by one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationMetadata {
    /// Current source guid per partition (cluster-wide, not per cache).
    pub partition_guids: Vec<(PartitionId, Uuid)>,
    /// Latest invalidation sequence per partition, for each requested cache.
    pub name_sequences: Vec<(String, Vec<(PartitionId, i64)>)>,
}

/// Receives invalidation events for one cache.
pub trait InvalidationHandler: Send + Sync {
    /// Applies a single event.
    fn on_invalidation(&self, event: InvalidationEvent);

    /// Applies a batch of events.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError::BatchLengthMismatch`] when the parallel vectors disagree
    /// in length; nothing from the batch is applied in that case.
    fn on_batch_invalidation(&self, batch: BatchInvalidation) -> Result<(), RepairError>;
}

/// Maps partition hashes to partition ids.
pub trait Partitioner: Send + Sync {
    fn partition_count(&self) -> usize;

    fn partition_id(&self, partition_hash: i32) -> PartitionId;

    /// Partition owning `token`.
    fn partition_for(&self, token: &Token) -> PartitionId {
        self.partition_id(token.partition_hash())
    }
}

/// Lists current cluster members.
pub trait Membership: Send + Sync {
    fn members(&self) -> Vec<MemberInfo>;
}

/// Installs and removes invalidation listeners.
#[async_trait]
pub trait InvalidationSource: Send + Sync {
    /// Subscribes `handler` to invalidations of `cache_name`.
    async fn subscribe(
        &self,
        cache_name: &str,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Result<SubscriptionId, ClusterError>;

    /// Removes a subscription. Returns `false` if it was unknown.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool, ClusterError>;
}

/// Fetches authoritative invalidation metadata from a single member.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Asks `member` for the partition guids and the latest sequences of `cache_names`
    /// on behalf of the client `requester`.
    async fn fetch_invalidation_metadata(
        &self,
        member: &MemberInfo,
        cache_names: &[String],
        requester: Uuid,
    ) -> Result<InvalidationMetadata, ClusterError>;
}

/// Everything the near cache needs from the surrounding cluster client.
#[derive(Clone)]
pub struct ClusterContext {
    /// Id of this client; events carrying it as source were caused locally.
    pub client_id: Uuid,
    pub partitioner: Arc<dyn Partitioner>,
    pub membership: Arc<dyn Membership>,
    pub invalidations: Arc<dyn InvalidationSource>,
    pub metadata: Arc<dyn MetadataSource>,
}

impl ClusterContext {
    /// Builds a context from one object implementing every collaborator trait.
    #[must_use]
    pub fn from_cluster<C>(client_id: Uuid, cluster: Arc<C>) -> Self
    where
        C: Partitioner + Membership + InvalidationSource + MetadataSource + 'static,
    {
        Self {
            client_id,
            partitioner: cluster.clone(),
            membership: cluster.clone(),
            invalidations: cluster.clone(),
            metadata: cluster,
        }
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("client_id", &self.client_id)
            .field("partition_count", &self.partitioner.partition_count())
            .finish_non_exhaustive()
    }
}
