//! Per-key single-flight coordination for `try_get_or_add`.
//!
//! The first caller for a key creates an [`InflightFetch`] and takes its only permit.
//! Later callers clone the semaphore, release the map shard, and wait. When the fetcher
//! finishes (or its future is dropped) the [`FetchGuard`] removes the inflight entry and
//! releases the permit; the next waiter then finds the value already cached.

use crate::types::Token;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};
use tracing::trace;

pub(crate) type InflightMap = DashMap<Token, InflightFetch, RandomState>;

/// An in-flight fetch: the semaphore callers for the same key queue on, and when it began.
#[derive(Clone)]
pub struct InflightFetch {
    pub semaphore: Arc<Semaphore>,
    pub started_at: Instant,
}

impl InflightFetch {
    fn new() -> Self {
        Self { semaphore: Arc::new(Semaphore::new(1)), started_at: Instant::now() }
    }
}

/// RAII guard held by the caller currently allowed to fetch a key.
pub struct FetchGuard {
    inflight: Arc<InflightMap>,
    key: Token,
    semaphore: Arc<Semaphore>,
    started_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl FetchGuard {
    /// Waits until this caller may fetch `key`.
    ///
    /// Returns `None` only if the semaphore was closed, which the store never does.
    pub(crate) async fn acquire(inflight: &Arc<InflightMap>, key: &Token) -> Option<Self> {
        // Clone the semaphore out so the shard lock is released before awaiting
        let fetch = inflight.entry(key.clone()).or_insert_with(InflightFetch::new).clone();

        let permit = fetch.semaphore.clone().acquire_owned().await.ok()?;
        Some(Self {
            inflight: Arc::clone(inflight),
            key: key.clone(),
            semaphore: fetch.semaphore,
            started_at: fetch.started_at,
            _permit: permit,
        })
    }

    #[must_use]
    pub fn key(&self) -> &Token {
        &self.key
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        // Only the entry this guard waited on; a newer fetch for the key keeps its own
        self.inflight.remove_if(&self.key, |_, fetch| Arc::ptr_eq(&fetch.semaphore, &self.semaphore));
        trace!(elapsed_ms = self.started_at.elapsed().as_millis() as u64, "fetch finished");
    }
}
