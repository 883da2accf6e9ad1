//! The repair loop and metadata fetching shared by cache creation and reconciliation.
//!
//! # Loop
//!
//! One task per manager, spawned when the first invalidating cache is created. Every
//! `repair_tick` it calls `fix_sequence_gap` on each repairer (local, cheap). When the
//! reconciliation interval has elapsed it also fetches metadata from every member and
//! applies it. The shutdown signal is checked first on every iteration and also
//! interrupts an in-progress reconciliation.

use super::CacheRegistry;
use crate::{
    cluster::{ClusterContext, ClusterError, InvalidationMetadata},
    config::NearCachingOptions,
    repair::RepairingHandler,
    types::MemberInfo,
};
use futures::future::join_all;
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Asks every current member for invalidation metadata of `cache_names`, concurrently.
pub(crate) async fn fetch_from_all_members(
    cluster: &ClusterContext,
    cache_names: &[String],
) -> Vec<(MemberInfo, Result<InvalidationMetadata, ClusterError>)> {
    let members = cluster.membership.members();
    let results = join_all(members.iter().map(|member| {
        cluster.metadata.fetch_invalidation_metadata(member, cache_names, cluster.client_id)
    }))
    .await;
    members.into_iter().zip(results).collect()
}

/// Seeds a new repairer from an authoritative snapshot.
pub(crate) async fn seed_repairer(cluster: &ClusterContext, repairer: &RepairingHandler) {
    let names = [repairer.name().to_string()];
    for (member, result) in fetch_from_all_members(cluster, &names).await {
        match result {
            Ok(metadata) => {
                repairer.initialize_guids(&metadata.partition_guids);
                repairer.initialize_sequences(&metadata.name_sequences);
            }
            Err(e) => {
                warn!(
                    cache = %repairer.name(),
                    member = %member.id,
                    address = %member.address,
                    error = %e,
                    "failed to fetch initial invalidation metadata"
                );
            }
        }
    }
}

/// Fetches metadata for every repairer from every member and applies it.
///
/// A failing member is logged and skipped; the others are still applied.
pub(crate) async fn reconcile(cluster: &ClusterContext, repairers: &[Arc<RepairingHandler>]) {
    if repairers.is_empty() {
        return;
    }

    let names: Vec<String> = repairers.iter().map(|r| r.name().to_string()).collect();
    let started = Instant::now();
    let mut failed = 0usize;

    let results = fetch_from_all_members(cluster, &names).await;
    let members = results.len();
    for (member, result) in results {
        match result {
            Ok(metadata) => {
                for repairer in repairers {
                    repairer.update_guids(&metadata.partition_guids);
                    repairer.update_sequences(&metadata.name_sequences);
                }
            }
            Err(e) => {
                failed += 1;
                warn!(
                    member = %member.id,
                    address = %member.address,
                    error = %e,
                    "failed to fetch invalidation metadata, skipping member"
                );
            }
        }
    }

    debug!(
        caches = names.len(),
        members,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "reconciliation finished"
    );
}

pub(crate) fn collect_repairers(registry: &CacheRegistry) -> Vec<Arc<RepairingHandler>> {
    registry
        .iter()
        .filter_map(|entry| entry.value().get().and_then(|cache| cache.repairer.clone()))
        .collect()
}

/// Runs until a shutdown signal arrives.
pub(crate) async fn run_repair_loop(
    registry: Arc<CacheRegistry>,
    cluster: ClusterContext,
    options: Arc<NearCachingOptions>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let reconciliation_interval = options.reconciliation_interval();
    info!(
        tick_ms = options.repair_tick_millis,
        reconciliation_interval_secs = reconciliation_interval.map(|i| i.as_secs()),
        max_tolerated_miss_count = options.max_tolerated_miss_count,
        "near cache repair task started"
    );

    let mut ticker = tokio::time::interval(options.repair_tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_reconciliation = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("repair task received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                let repairers = collect_repairers(&registry);
                for repairer in &repairers {
                    repairer.fix_sequence_gap();
                }

                let due = reconciliation_interval
                    .is_some_and(|interval| last_reconciliation.elapsed() >= interval);
                if due {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.recv() => {
                            debug!("repair task interrupted during reconciliation");
                            break;
                        }

                        () = reconcile(&cluster, &repairers) => {
                            last_reconciliation = Instant::now();
                        }
                    }
                }
            }
        }
    }

    info!("near cache repair task stopped");
}
