//! # Near Cache Core
//!
//! Client-side near cache that mirrors entries of a partitioned cluster store and keeps
//! them consistent through server-pushed invalidations.
//!
//! This crate provides:
//!
//! - **[`cache`]**: the concurrent entry store with TTL, idle expiry, bounded size under
//!   LRU/LFU/random eviction, single-flight fetches, and a typed façade.
//!
//! - **[`repair`]**: per-partition invalidation sequences and source guids, gap
//!   detection, and stale-entry marking.
//!
//! - **[`manager`]**: named cache registry and the background repair and reconciliation
//!   task.
//!
//! - **[`cluster`]**: the traits through which the surrounding cluster client supplies
//!   partitioning, membership, invalidation events and metadata.
//!
//! - **[`config`]**: layered options loading (defaults, TOML file, environment).
//!
//! - **[`codec`]**: key and value serialization into [`types::Token`]s.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       NearCacheManager                       │
//! │  ┌──────────────────────────┐   ┌─────────────────────────┐  │
//! │  │ name -> ManagedCache     │   │ repair task (1/manager) │  │
//! │  │   CacheStore             │◄──┤  fix_sequence_gap       │  │
//! │  │   RepairingHandler ──────┼──►│  reconcile (interval)   │  │
//! │  └────────────┬─────────────┘   └────────────┬────────────┘  │
//! └───────────────┼──────────────────────────────┼───────────────┘
//!                 │ subscribe                    │ fetch metadata
//!                 ▼                              ▼
//!        InvalidationSource              MetadataSource (per member)
//! ```
//!
//! ## Read Path
//!
//! ```text
//! try_get(key)
//!     │
//!     ▼
//! throttled expiry sweep ──► entry present? ── no ──► miss
//!                                 │ yes
//!                                 ▼
//!                     stale (guid / stale sequence)? ── yes ──► remove, miss
//!                                 │ no
//!                                 ▼
//!                     expired or idle? ── yes ──► remove, miss
//!                                 │ no
//!                                 ▼
//!                               hit
//! ```
//!
//! ## Feature Flags
//!
//! - `verbose-logging`: per-entry trace events on the read path

pub mod cache;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod manager;
pub mod repair;
pub mod types;
pub mod utils;

pub use cache::{CacheStore, NearCache, NearCacheError, NearCacheStats};
pub use config::{NearCacheOptions, NearCachingOptions};
pub use manager::{NearCacheManager, NearCacheManagerError};
