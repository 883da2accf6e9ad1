//! In-process cluster with server-side invalidation state.
//!
//! Every write bumps the per-cache, per-partition sequence the way a member would and
//! pushes the resulting event to the subscribed handlers. Events can be dropped in
//! transit to simulate a lossy connection; the sequences still advance, so reconciliation
//! sees what was lost.

use async_trait::async_trait;
use dashmap::DashMap;
use nearcache_core::{
    cluster::{
        BatchInvalidation, ClusterContext, ClusterError, HashPartitioner, InvalidationEvent,
        InvalidationHandler, InvalidationMetadata, InvalidationSource, Membership, MetadataSource,
        Partitioner,
    },
    repair::RepairError,
    types::{MemberInfo, PartitionId, SubscriptionId, Token},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::debug;
use uuid::Uuid;

struct Subscription {
    cache: String,
    handler: Arc<dyn InvalidationHandler>,
}

/// Mock cluster implementing every collaborator trait.
pub struct MockCluster {
    partitioner: HashPartitioner,
    members: Vec<MemberInfo>,
    partition_guids: Mutex<Vec<Uuid>>,
    sequences: DashMap<(String, PartitionId), i64>,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    unreachable: Mutex<HashSet<Uuid>>,
    drop_remaining: AtomicUsize,
    reject_subscriptions: AtomicBool,
    metadata_requests: AtomicUsize,
}

impl MockCluster {
    /// Creates a cluster of `member_count` members over `partition_count` partitions.
    #[must_use]
    pub fn new(member_count: usize, partition_count: usize) -> Arc<Self> {
        let members = (0..member_count)
            .map(|i| MemberInfo::new(Uuid::new_v4(), format!("127.0.0.1:{}", 5701 + i)))
            .collect();
        Arc::new(Self {
            partitioner: HashPartitioner::new(partition_count),
            members,
            partition_guids: Mutex::new((0..partition_count).map(|_| Uuid::new_v4()).collect()),
            sequences: DashMap::new(),
            subscriptions: DashMap::new(),
            unreachable: Mutex::new(HashSet::new()),
            drop_remaining: AtomicUsize::new(0),
            reject_subscriptions: AtomicBool::new(false),
            metadata_requests: AtomicUsize::new(0),
        })
    }

    /// A cluster context for a client with id `client_id`.
    #[must_use]
    pub fn context(self: &Arc<Self>, client_id: Uuid) -> ClusterContext {
        ClusterContext::from_cluster(client_id, Arc::clone(self))
    }

    #[must_use]
    pub fn partition_of(&self, key: &Token) -> PartitionId {
        self.partitioner.partition_for(key)
    }

    #[must_use]
    pub fn partition_guid(&self, partition_id: PartitionId) -> Uuid {
        self.partition_guids.lock()[partition_id]
    }

    #[must_use]
    pub fn sequence(&self, cache: &str, partition_id: PartitionId) -> i64 {
        self.sequences.get(&(cache.to_string(), partition_id)).map_or(0, |seq| *seq)
    }

    /// Number of active invalidation subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn metadata_requests(&self) -> usize {
        self.metadata_requests.load(Ordering::SeqCst)
    }

    /// Drops the next `count` events instead of delivering them.
    pub fn drop_next(&self, count: usize) {
        self.drop_remaining.store(count, Ordering::SeqCst);
    }

    pub fn reject_subscriptions(&self) {
        self.reject_subscriptions.store(true, Ordering::SeqCst);
    }

    /// Makes member `index` fail every metadata request.
    pub fn set_unreachable(&self, index: usize) {
        self.unreachable.lock().insert(self.members[index].id);
    }

    /// Moves a partition to a new owner: its guid changes and no event is sent.
    pub fn migrate_partition(&self, partition_id: PartitionId) -> Uuid {
        let guid = Uuid::new_v4();
        self.partition_guids.lock()[partition_id] = guid;
        debug!(partition = partition_id, guid = %guid, "partition migrated");
        guid
    }

    /// Records a write to `key` by `source_id` and publishes its invalidation.
    pub fn write(&self, cache: &str, key: &Token, source_id: Uuid) -> InvalidationEvent {
        let event = self.next_event(cache, Some(key.clone()), source_id);
        self.deliver(cache, &event);
        event
    }

    /// Records a map-wide clear by `source_id` and publishes its invalidation.
    pub fn clear(&self, cache: &str, source_id: Uuid) -> InvalidationEvent {
        let event = self.next_event(cache, None, source_id);
        self.deliver(cache, &event);
        event
    }

    /// Hands `batch` to every handler of `cache`, returning each handler's result.
    pub fn deliver_batch(&self, cache: &str, batch: &BatchInvalidation) -> Vec<Result<(), RepairError>> {
        self.handlers_of(cache)
            .into_iter()
            .map(|handler| handler.on_batch_invalidation(batch.clone()))
            .collect()
    }

    /// Hands `event` to every handler of `cache` unless it is being dropped.
    pub fn deliver(&self, cache: &str, event: &InvalidationEvent) {
        let dropped = self
            .drop_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            debug!(cache, sequence = event.sequence, "invalidation dropped in transit");
            return;
        }
        for handler in self.handlers_of(cache) {
            handler.on_invalidation(event.clone());
        }
    }

    fn next_event(&self, cache: &str, key: Option<Token>, source_id: Uuid) -> InvalidationEvent {
        let partition_id = self.partition_of(key.as_ref().unwrap_or(&Token::for_name(cache)));
        let sequence = {
            let mut slot = self.sequences.entry((cache.to_string(), partition_id)).or_insert(0);
            *slot += 1;
            *slot
        };
        InvalidationEvent {
            key,
            source_id,
            partition_guid: self.partition_guid(partition_id),
            sequence,
        }
    }

    fn handlers_of(&self, cache: &str) -> Vec<Arc<dyn InvalidationHandler>> {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().cache == cache)
            .map(|entry| Arc::clone(&entry.value().handler))
            .collect()
    }
}

impl Partitioner for MockCluster {
    fn partition_count(&self) -> usize {
        self.partitioner.partition_count()
    }

    fn partition_id(&self, partition_hash: i32) -> PartitionId {
        self.partitioner.partition_id(partition_hash)
    }
}

impl Membership for MockCluster {
    fn members(&self) -> Vec<MemberInfo> {
        self.members.clone()
    }
}

#[async_trait]
impl InvalidationSource for MockCluster {
    async fn subscribe(
        &self,
        cache_name: &str,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Result<SubscriptionId, ClusterError> {
        if self.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(ClusterError::SubscriptionRejected {
                cache: cache_name.to_string(),
                reason: "listeners disabled".to_string(),
            });
        }
        let id = Uuid::new_v4();
        self.subscriptions
            .insert(id, Subscription { cache: cache_name.to_string(), handler });
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool, ClusterError> {
        Ok(self.subscriptions.remove(&subscription).is_some())
    }
}

#[async_trait]
impl MetadataSource for MockCluster {
    async fn fetch_invalidation_metadata(
        &self,
        member: &MemberInfo,
        cache_names: &[String],
        _requester: Uuid,
    ) -> Result<InvalidationMetadata, ClusterError> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().contains(&member.id) {
            return Err(ClusterError::MemberUnreachable {
                member: member.id,
                reason: "connection refused".to_string(),
            });
        }

        let partition_guids = self.partition_guids.lock().iter().copied().enumerate().collect();
        let name_sequences = cache_names
            .iter()
            .map(|name| {
                let sequences = (0..self.partition_count())
                    .map(|partition_id| (partition_id, self.sequence(name, partition_id)))
                    .collect();
                (name.clone(), sequences)
            })
            .collect();
        Ok(InvalidationMetadata { partition_guids, name_sequences })
    }
}
