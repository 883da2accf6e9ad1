//! Near cache configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations and `#[serde(default)]`
//! 2. **Config file**: TOML file specified by `NEARCACHE_CONFIG` env var
//! 3. **Environment variables**: `NEARCACHE__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`NearCachingOptions`]: client-wide repair and reconciliation settings
//! - [`NearCacheOptions`]: per-cache sizing, expiry and eviction settings, keyed by
//!   cache name pattern
//!
//! # Validation
//!
//! [`NearCachingOptions::validate`] rejects negative miss counts and intervals, and a
//! reconciliation interval shorter than the configured minimum. The manager refuses to
//! start with invalid options.
//!
//! # Example
//!
//! ```toml
//! reconciliation_interval_seconds = 60
//! min_reconciliation_interval_seconds = 30
//! max_tolerated_miss_count = 10
//!
//! [caches."orders-*"]
//! eviction_policy = "lfu"
//! max_size = 5000
//! time_to_live_seconds = 300
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};
use thiserror::Error;

pub use config::ConfigError;

/// Which entries to evict first once a cache reaches `max_size`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used: oldest last hit (or creation) first.
    #[default]
    Lru,
    /// Least frequently used: lowest hit count first.
    Lfu,
    /// Arbitrary victims.
    Random,
    /// Eviction disabled; inserts fail once the cache is full.
    None,
}

/// How cached values are held in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InMemoryFormat {
    /// Serialized token, decoded on every read.
    #[default]
    Binary,
    /// Deserialized object, shared by reference on every read.
    Object,
}

/// Per-cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearCacheOptions {
    /// Eviction policy applied when the cache is full. Defaults to `lru`.
    pub eviction_policy: EvictionPolicy,

    /// In-memory representation of values. Defaults to `binary`.
    pub in_memory_format: InMemoryFormat,

    /// Maximum number of entries before eviction kicks in. Defaults to `10000`.
    pub max_size: usize,

    /// Lifetime of an entry in seconds, `0` for unlimited. Defaults to `0`.
    pub time_to_live_seconds: u64,

    /// Maximum time since the last hit in seconds, `0` for unlimited. Defaults to `0`.
    pub max_idle_seconds: u64,

    /// Share of entries evicted per eviction pass, clamped to `1..=100`. Defaults to `20`.
    pub eviction_percentage: u32,

    /// Minimum seconds between two expiry sweeps. Defaults to `5`.
    pub cleanup_period_seconds: u64,

    /// Track server-side invalidations for this cache. Defaults to `true`.
    pub invalidate_on_change: bool,
}

impl Default for NearCacheOptions {
    fn default() -> Self {
        Self {
            eviction_policy: EvictionPolicy::Lru,
            in_memory_format: InMemoryFormat::Binary,
            max_size: 10_000,
            time_to_live_seconds: 0,
            max_idle_seconds: 0,
            eviction_percentage: 20,
            cleanup_period_seconds: 5,
            invalidate_on_change: true,
        }
    }
}

impl NearCacheOptions {
    /// Entry lifetime, `None` when entries never expire.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        (self.time_to_live_seconds > 0).then(|| Duration::from_secs(self.time_to_live_seconds))
    }

    /// Idle limit, `None` when entries are never considered idle.
    #[must_use]
    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_seconds > 0).then(|| Duration::from_secs(self.max_idle_seconds))
    }

    #[must_use]
    pub fn cleanup_period(&self) -> Duration {
        Duration::from_secs(self.cleanup_period_seconds)
    }

    /// Eviction percentage clamped into `1..=100`.
    #[must_use]
    pub fn effective_eviction_percentage(&self) -> u32 {
        self.eviction_percentage.clamp(1, 100)
    }
}

/// Invalid client-wide near caching options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("max_tolerated_miss_count must be >= 0, got {0}")]
    NegativeMaxToleratedMissCount(i64),

    #[error("reconciliation_interval_seconds must be >= 0, got {0}")]
    NegativeReconciliationInterval(i64),

    #[error("min_reconciliation_interval_seconds must be >= 0, got {0}")]
    NegativeMinReconciliationInterval(i64),

    #[error(
        "reconciliation_interval_seconds ({interval}) must be 0 or >= \
         min_reconciliation_interval_seconds ({minimum})"
    )]
    ReconciliationIntervalBelowMinimum { interval: i64, minimum: i64 },

    #[error("repair_tick_millis must be greater than 0")]
    ZeroRepairTick,
}

/// Client-wide near caching settings plus per-cache options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearCachingOptions {
    /// Seconds between two full reconciliations against the cluster, `0` to disable.
    /// Defaults to `60`.
    pub reconciliation_interval_seconds: i64,

    /// Lower bound for a non-zero `reconciliation_interval_seconds`. Defaults to `30`.
    pub min_reconciliation_interval_seconds: i64,

    /// Total missed invalidations per cache tolerated before entries are marked stale.
    /// Defaults to `10`.
    pub max_tolerated_miss_count: i64,

    /// Period of the background repair loop in milliseconds. Defaults to `1000`.
    pub repair_tick_millis: u64,

    /// Per-cache options keyed by exact name or a pattern with one `*` wildcard.
    pub caches: HashMap<String, NearCacheOptions>,
}

impl Default for NearCachingOptions {
    fn default() -> Self {
        Self {
            reconciliation_interval_seconds: 60,
            min_reconciliation_interval_seconds: 30,
            max_tolerated_miss_count: 10,
            repair_tick_millis: 1000,
            caches: HashMap::new(),
        }
    }
}

impl NearCachingOptions {
    /// Validates the repair settings.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as an [`OptionsError`].
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_tolerated_miss_count < 0 {
            return Err(OptionsError::NegativeMaxToleratedMissCount(self.max_tolerated_miss_count));
        }
        if self.reconciliation_interval_seconds < 0 {
            return Err(OptionsError::NegativeReconciliationInterval(
                self.reconciliation_interval_seconds,
            ));
        }
        if self.min_reconciliation_interval_seconds < 0 {
            return Err(OptionsError::NegativeMinReconciliationInterval(
                self.min_reconciliation_interval_seconds,
            ));
        }
        if self.reconciliation_interval_seconds > 0 &&
            self.reconciliation_interval_seconds < self.min_reconciliation_interval_seconds
        {
            return Err(OptionsError::ReconciliationIntervalBelowMinimum {
                interval: self.reconciliation_interval_seconds,
                minimum: self.min_reconciliation_interval_seconds,
            });
        }
        if self.repair_tick_millis == 0 {
            return Err(OptionsError::ZeroRepairTick);
        }
        Ok(())
    }

    /// Interval between full reconciliations, `None` when disabled.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn reconciliation_interval(&self) -> Option<Duration> {
        (self.reconciliation_interval_seconds > 0)
            .then(|| Duration::from_secs(self.reconciliation_interval_seconds as u64))
    }

    #[must_use]
    pub fn repair_tick(&self) -> Duration {
        Duration::from_millis(self.repair_tick_millis)
    }

    /// Resolves the options for a cache name.
    ///
    /// An exact key wins, then the longest matching wildcard pattern, then defaults.
    /// Equally long patterns resolve to the lexicographically smallest one.
    #[must_use]
    pub fn options_for(&self, name: &str) -> NearCacheOptions {
        if let Some(options) = self.caches.get(name) {
            return options.clone();
        }

        self.caches
            .iter()
            .filter(|(pattern, _)| wildcard_matches(pattern, name))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, options)| options.clone())
            .unwrap_or_default()
    }

    /// Loads options from a TOML file, then applies `NEARCACHE__*` environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file or environment cannot be parsed.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("NEARCACHE").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Loads options from `config/nearcache.toml`, or the path in `NEARCACHE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("NEARCACHE_CONFIG")
            .unwrap_or_else(|_| "config/nearcache.toml".to_string());
        Self::from_file(&config_path)
    }
}

/// Matches `name` against a pattern containing at most one `*`.
fn wildcard_matches(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len() &&
                name.starts_with(prefix) &&
                name.ends_with(suffix)
        }
        None => pattern == name,
    }
}
