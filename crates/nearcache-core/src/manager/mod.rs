//! Owner of all near caches of one client.
//!
//! # Responsibilities
//!
//! - Creates caches by name exactly once, even under concurrent `get_or_create`
//! - Wires invalidating caches to a [`RepairingHandler`], subscribes it to the cluster's
//!   invalidation stream, and seeds it from member metadata
//! - Runs one background repair task for all caches (see [`background`])
//! - Tears everything down on [`NearCacheManager::dispose`]
//!
//! # Degraded Mode
//!
//! If the invalidation subscription fails the cache is still created and served, but it
//! has no repairer: nothing will ever invalidate its entries. This is logged at `error`.
//!
//! # Creation Racing Teardown
//!
//! Creation re-checks the lifecycle state under the repair task lock once subscribing and
//! seeding are done, and backs out if the manager was disposed meanwhile. `dispose` and
//! `destroy` wait for in-flight creations of the caches they remove, so a cache finished
//! during teardown is still unsubscribed.

pub mod background;
pub mod config;

#[cfg(test)]
mod tests;

pub use config::{ManagerState, NearCacheManagerError};

use crate::{
    cache::{CacheStore, NearCache},
    cluster::ClusterContext,
    codec::JsonCodec,
    config::{NearCacheOptions, NearCachingOptions},
    repair::{MetadataTable, RepairingHandler},
    types::SubscriptionId,
};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tokio::{
    sync::{broadcast, OnceCell},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// A cache together with its repair wiring.
pub(crate) struct ManagedCache {
    pub(crate) store: Arc<CacheStore>,
    pub(crate) repairer: Option<Arc<RepairingHandler>>,
    pub(crate) subscription: Option<SubscriptionId>,
}

pub(crate) type CacheCell = Arc<OnceCell<Arc<ManagedCache>>>;

/// Cache name to lazily initialized cache. The `OnceCell` makes creation single-flight.
pub(crate) type CacheRegistry = DashMap<String, CacheCell, RandomState>;

/// Waits for an in-flight creation in `cell` and returns its cache, if one was created.
async fn settled(cell: &CacheCell) -> Option<Arc<ManagedCache>> {
    cell.get_or_try_init(|| async { Err(()) }).await.ok().map(Arc::clone)
}

/// Creates, tracks and repairs the near caches of one cluster client.
pub struct NearCacheManager {
    options: Arc<NearCachingOptions>,
    cluster: ClusterContext,
    caches: Arc<CacheRegistry>,
    state: AtomicU8,
    shutdown_tx: broadcast::Sender<()>,
    /// Also serializes repair task start against dispose.
    repair_task: Mutex<Option<JoinHandle<()>>>,
}

impl NearCacheManager {
    /// Creates a manager after validating `options`.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheManagerError::InvalidOptions`] if validation fails.
    pub fn new(
        options: NearCachingOptions,
        cluster: ClusterContext,
    ) -> Result<Self, NearCacheManagerError> {
        options.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            client_id = %cluster.client_id,
            partitions = cluster.partitioner.partition_count(),
            "near cache manager created"
        );
        Ok(Self {
            options: Arc::new(options),
            cluster,
            caches: Arc::new(DashMap::with_hasher(RandomState::new())),
            state: AtomicU8::new(ManagerState::NotStarted as u8),
            shutdown_tx,
            repair_task: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn options(&self) -> &NearCachingOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the cache called `name`, creating it with the configured options for that name.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheManagerError::Disposed`] after [`dispose`](Self::dispose).
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<CacheStore>, NearCacheManagerError> {
        let options = self.options.options_for(name);
        self.get_or_create_with_options(name, options).await
    }

    /// Returns the cache called `name`, creating it with `options` if it does not exist.
    ///
    /// Concurrent calls for the same name create the cache once; `options` of the losing
    /// calls are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheManagerError::Disposed`] after [`dispose`](Self::dispose), also
    /// when disposal started while the cache was being created.
    pub async fn get_or_create_with_options(
        &self,
        name: &str,
        options: NearCacheOptions,
    ) -> Result<Arc<CacheStore>, NearCacheManagerError> {
        if self.state().is_disposed() {
            return Err(NearCacheManagerError::Disposed);
        }

        // Clone the cell out so the shard lock is not held across the await
        let cell = self.caches.entry(name.to_string()).or_default().clone();
        let cache = cell.get_or_try_init(|| self.create_cache(name, options)).await?;
        Ok(Arc::clone(&cache.store))
    }

    /// Typed view of the cache called `name`, created with the configured options if needed.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheManagerError::Disposed`] after [`dispose`](Self::dispose).
    pub async fn near_cache<K, V>(
        &self,
        name: &str,
    ) -> Result<NearCache<K, V, JsonCodec>, NearCacheManagerError>
    where
        K: Serialize,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Ok(NearCache::new(self.get_or_create(name).await?))
    }

    /// Returns an existing cache.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CacheStore>> {
        self.caches.get(name)?.get().map(|cache| Arc::clone(&cache.store))
    }

    /// Returns the repairer of an invalidating cache.
    #[must_use]
    pub fn repairer(&self, name: &str) -> Option<Arc<RepairingHandler>> {
        self.caches.get(name)?.get()?.repairer.clone()
    }

    /// Names of all created caches.
    #[must_use]
    pub fn cache_names(&self) -> Vec<String> {
        self.caches
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Removes every entry from every cache. The caches stay registered.
    pub fn clear_all(&self) {
        for entry in self.caches.iter() {
            if let Some(cache) = entry.value().get() {
                cache.store.clear();
            }
        }
    }

    /// Unsubscribes, clears and forgets the cache called `name`.
    ///
    /// A cache still being created is waited for and then torn down. Returns `false` if
    /// no such cache exists.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheManagerError::Cluster`] if unsubscribing failed. The cache is
    /// removed regardless.
    pub async fn destroy(&self, name: &str) -> Result<bool, NearCacheManagerError> {
        let Some((_, cell)) = self.caches.remove(name) else {
            return Ok(false);
        };
        let Some(cache) = settled(&cell).await else {
            return Ok(false);
        };

        cache.store.clear();
        let result = self.unsubscribe(&cache).await;
        info!(cache = %name, "near cache destroyed");
        result.map(|()| true)
    }

    /// Stops the repair task, then unsubscribes and clears every cache.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn dispose(&self) {
        let handle = {
            let mut task = self.repair_task.lock();
            if self.state().is_disposed() {
                return;
            }
            self.state.store(ManagerState::Cancelling as u8, Ordering::Release);
            if self.shutdown_tx.send(()).is_err() {
                debug!("no repair task listening for shutdown");
            }
            task.take()
        };

        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!("repair task completed"),
                Err(e) if e.is_cancelled() => debug!("repair task cancelled"),
                Err(e) => error!(error = %e, "repair task failed"),
            }
        }

        let cells: Vec<CacheCell> =
            self.caches.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.caches.clear();
        for cell in cells {
            if let Some(cache) = settled(&cell).await {
                self.release(&cache).await;
            }
        }

        self.state.store(ManagerState::Stopped as u8, Ordering::Release);
        info!("near cache manager disposed");
    }

    async fn create_cache(
        &self,
        name: &str,
        options: NearCacheOptions,
    ) -> Result<Arc<ManagedCache>, NearCacheManagerError> {
        // Waiters on a cell whose creation backed out land here after disposal
        if self.state().is_disposed() {
            return Err(NearCacheManagerError::Disposed);
        }

        let cache = if options.invalidate_on_change {
            self.create_invalidating(name, options).await
        } else {
            Arc::new(ManagedCache {
                store: Arc::new(CacheStore::new(name, options)),
                repairer: None,
                subscription: None,
            })
        };

        let registered = {
            let mut task = self.repair_task.lock();
            if self.state().is_disposed() {
                false
            } else {
                if cache.repairer.is_some() {
                    self.ensure_repair_task(&mut task);
                }
                true
            }
        };
        if !registered {
            debug!(cache = %name, "manager disposed during creation, releasing cache");
            self.release(&cache).await;
            return Err(NearCacheManagerError::Disposed);
        }

        info!(
            cache = %name,
            invalidation = cache.repairer.is_some(),
            subscription = ?cache.subscription,
            "near cache created"
        );
        Ok(cache)
    }

    /// Subscribes and seeds a cache that tracks invalidations, or falls back to a plain
    /// store when the subscription is refused.
    async fn create_invalidating(&self, name: &str, options: NearCacheOptions) -> Arc<ManagedCache> {
        let table = Arc::new(MetadataTable::new(Arc::clone(&self.cluster.partitioner)));
        let store = Arc::new(CacheStore::with_detector(name, options, table.clone()));
        let repairer = Arc::new(RepairingHandler::new(
            self.cluster.client_id,
            store.clone(),
            table,
            self.options.max_tolerated_miss_count,
        ));

        let subscription = match self.cluster.invalidations.subscribe(name, repairer.clone()).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    cache = %name,
                    error = %e,
                    "invalidation subscription failed, cache will serve without invalidation"
                );
                // Nothing will update the metadata table, so drop it from the read path
                let store = Arc::new(CacheStore::new(name, store.options().clone()));
                return Arc::new(ManagedCache { store, repairer: None, subscription: None });
            }
        };

        background::seed_repairer(&self.cluster, &repairer).await;
        Arc::new(ManagedCache { store, repairer: Some(repairer), subscription: Some(subscription) })
    }

    /// Starts the background repair task unless it already ran or the manager is disposed.
    ///
    /// `task` is the locked repair task slot.
    fn ensure_repair_task(&self, task: &mut Option<JoinHandle<()>>) {
        if self.state() != ManagerState::NotStarted {
            return;
        }

        let handle = tokio::spawn(background::run_repair_loop(
            Arc::clone(&self.caches),
            self.cluster.clone(),
            Arc::clone(&self.options),
            self.shutdown_tx.subscribe(),
        ));
        *task = Some(handle);
        self.state.store(ManagerState::Running as u8, Ordering::Release);
    }

    /// Unsubscribes and clears a cache that is leaving the registry, logging failures.
    async fn release(&self, cache: &ManagedCache) {
        if let Err(e) = self.unsubscribe(cache).await {
            warn!(cache = %cache.store.name(), error = %e, "failed to unsubscribe cache");
        }
        cache.store.clear();
    }

    async fn unsubscribe(&self, cache: &ManagedCache) -> Result<(), NearCacheManagerError> {
        if let Some(subscription) = cache.subscription {
            self.cluster.invalidations.unsubscribe(subscription).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NearCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCacheManager")
            .field("state", &self.state())
            .field("caches", &self.caches.len())
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}
