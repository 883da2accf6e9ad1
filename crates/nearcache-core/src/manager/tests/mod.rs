//! Tests for near cache manager functionality.
//!
//! Organized by area: lifecycle and registry behavior, and the background repair loop.


use crate::{
    cache::CachedValue,
    cluster::{
        ClusterContext, ClusterError, HashPartitioner, InvalidationEvent, InvalidationHandler,
        InvalidationMetadata, InvalidationSource, Membership, MetadataSource, Partitioner,
    },
    config::NearCachingOptions,
    manager::NearCacheManager,
    types::{MemberInfo, PartitionId, SubscriptionId, Token},
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;
use uuid::Uuid;

// ============================================================================
// Shared Test Helpers
// ============================================================================

pub(crate) const PARTITIONS: usize = 17;

/// In-process stand-in for every cluster collaborator.
pub(crate) struct TestCluster {
    partitioner: HashPartitioner,
    members: Mutex<Vec<MemberInfo>>,
    metadata: Mutex<InvalidationMetadata>,
    failing_members: Mutex<HashSet<Uuid>>,
    reject_subscriptions: AtomicBool,
    subscribe_gate: Mutex<Option<Arc<Notify>>>,
    handlers: DashMap<SubscriptionId, (String, Arc<dyn InvalidationHandler>)>,
    pub(crate) fetches: AtomicUsize,
    pub(crate) subscriptions: AtomicUsize,
    pub(crate) unsubscriptions: AtomicUsize,
}

impl TestCluster {
    pub(crate) fn new(member_count: usize) -> Arc<Self> {
        let members = (0..member_count)
            .map(|i| MemberInfo::new(Uuid::new_v4(), format!("10.0.0.{i}:5701")))
            .collect();
        Arc::new(Self {
            partitioner: HashPartitioner::new(PARTITIONS),
            members: Mutex::new(members),
            metadata: Mutex::new(InvalidationMetadata::default()),
            failing_members: Mutex::new(HashSet::new()),
            reject_subscriptions: AtomicBool::new(false),
            subscribe_gate: Mutex::new(None),
            handlers: DashMap::new(),
            fetches: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            unsubscriptions: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_metadata(&self, metadata: InvalidationMetadata) {
        *self.metadata.lock() = metadata;
    }

    pub(crate) fn fail_member(&self, index: usize) {
        let id = self.members.lock()[index].id;
        self.failing_members.lock().insert(id);
    }

    pub(crate) fn reject_subscriptions(&self) {
        self.reject_subscriptions.store(true, Ordering::SeqCst);
    }

    /// Makes every `subscribe` wait for a permit on the returned `Notify`.
    pub(crate) fn hold_subscriptions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.subscribe_gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn active_subscriptions(&self) -> usize {
        self.handlers.len()
    }

    /// Delivers an event to every handler subscribed to `cache`.
    pub(crate) fn publish(&self, cache: &str, event: &InvalidationEvent) {
        let handlers: Vec<_> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == cache)
            .map(|entry| entry.value().1.clone())
            .collect();
        for handler in handlers {
            handler.on_invalidation(event.clone());
        }
    }

    pub(crate) fn partition_of(&self, token: &Token) -> PartitionId {
        self.partitioner.partition_for(token)
    }
}

impl Partitioner for TestCluster {
    fn partition_count(&self) -> usize {
        self.partitioner.partition_count()
    }

    fn partition_id(&self, partition_hash: i32) -> PartitionId {
        self.partitioner.partition_id(partition_hash)
    }
}

impl Membership for TestCluster {
    fn members(&self) -> Vec<MemberInfo> {
        self.members.lock().clone()
    }
}

#[async_trait]
impl InvalidationSource for TestCluster {
    async fn subscribe(
        &self,
        cache_name: &str,
        handler: Arc<dyn InvalidationHandler>,
    ) -> Result<SubscriptionId, ClusterError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let gate = self.subscribe_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(ClusterError::SubscriptionRejected {
                cache: cache_name.to_string(),
                reason: "listener limit reached".to_string(),
            });
        }
        let id = Uuid::new_v4();
        self.handlers.insert(id, (cache_name.to_string(), handler));
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool, ClusterError> {
        self.unsubscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(self.handlers.remove(&subscription).is_some())
    }
}

#[async_trait]
impl MetadataSource for TestCluster {
    async fn fetch_invalidation_metadata(
        &self,
        member: &MemberInfo,
        _cache_names: &[String],
        _requester: Uuid,
    ) -> Result<InvalidationMetadata, ClusterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_members.lock().contains(&member.id) {
            return Err(ClusterError::MemberUnreachable {
                member: member.id,
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.metadata.lock().clone())
    }
}

pub(crate) fn test_options() -> NearCachingOptions {
    NearCachingOptions {
        reconciliation_interval_seconds: 30,
        min_reconciliation_interval_seconds: 30,
        max_tolerated_miss_count: 10,
        repair_tick_millis: 1000,
        ..Default::default()
    }
}

pub(crate) fn create_test_manager(
    cluster: &Arc<TestCluster>,
    options: NearCachingOptions,
) -> NearCacheManager {
    let context = ClusterContext::from_cluster(Uuid::new_v4(), cluster.clone());
    NearCacheManager::new(options, context).expect("valid test options")
}

pub(crate) fn value(bytes: &[u8]) -> Option<CachedValue> {
    Some(CachedValue::Data(Token::new(bytes.to_vec())))
}
