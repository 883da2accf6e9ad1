use crate::types::{PartitionId, Token};
use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// A cached value in the representation chosen by the cache's in-memory format.
#[derive(Clone)]
pub enum CachedValue {
    /// Serialized value, decoded on read.
    Data(Token),
    /// Deserialized value shared between readers.
    Object(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(token) => f.debug_tuple("Data").field(token).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// One cached key/value pair with its expiry, access and invalidation bookkeeping.
///
/// Entries are immutable once published into the store except for the hit counter
/// and last-hit timestamp, which are atomics so readers can record hits concurrently.
/// The invalidation fields are filled in before publication.
pub struct CacheEntry {
    key: Token,
    value: CachedValue,
    created_at: Instant,
    expires_at: Option<Instant>,
    /// Microseconds after `created_at` of the latest hit, plus one. Zero means never hit.
    last_hit_offset: AtomicU64,
    hits: AtomicU64,
    /// Store-assigned insertion order, breaks ties between equal timestamps.
    ordinal: u64,
    partition_id: Option<PartitionId>,
    sequence: i64,
    source_guid: Option<Uuid>,
}

impl CacheEntry {
    /// Creates an entry, or `None` when there is no value to cache.
    #[must_use]
    pub fn create(key: Token, value: Option<CachedValue>, ttl: Option<Duration>) -> Option<Self> {
        value.map(|value| Self::new(key, value, ttl))
    }

    pub(crate) fn new(key: Token, value: CachedValue, ttl: Option<Duration>) -> Self {
        let created_at = Instant::now();
        Self {
            key,
            value,
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
            last_hit_offset: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            ordinal: 0,
            partition_id: None,
            sequence: 0,
            source_guid: None,
        }
    }

    pub(crate) fn set_ordinal(&mut self, ordinal: u64) {
        self.ordinal = ordinal;
    }

    /// Records where the entry's partition stood when the entry was created.
    pub fn set_invalidation_metadata(
        &mut self,
        partition_id: PartitionId,
        sequence: i64,
        source_guid: Option<Uuid>,
    ) {
        self.partition_id = Some(partition_id);
        self.sequence = sequence;
        self.source_guid = source_guid;
    }

    #[must_use]
    pub fn key(&self) -> &Token {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &CachedValue {
        &self.value
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    #[must_use]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    #[must_use]
    pub fn partition_id(&self) -> Option<PartitionId> {
        self.partition_id
    }

    #[must_use]
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    #[must_use]
    pub fn source_guid(&self) -> Option<Uuid> {
        self.source_guid
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Time of the latest hit, `None` until the first one.
    #[must_use]
    pub fn last_hit(&self) -> Option<Instant> {
        match self.last_hit_offset.load(Ordering::Acquire) {
            0 => None,
            offset => Some(self.created_at + Duration::from_micros(offset - 1)),
        }
    }

    /// Latest hit, or creation time for entries never hit.
    #[must_use]
    pub fn last_access(&self) -> Instant {
        self.last_hit().unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether the entry went unused for longer than `max_idle`.
    ///
    /// `None` disables idle expiry.
    #[must_use]
    pub fn is_idle_at(&self, max_idle: Option<Duration>, now: Instant) -> bool {
        max_idle.is_some_and(|max_idle| self.last_access() + max_idle <= now)
    }

    /// Counts a hit and moves the last-hit time forward. Safe from any number of readers.
    #[allow(clippy::cast_possible_truncation)]
    pub fn notify_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let offset = Instant::now().saturating_duration_since(self.created_at).as_micros() as u64;
        self.last_hit_offset.fetch_max(offset + 1, Ordering::AcqRel);
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("hits", &self.hits())
            .field("partition_id", &self.partition_id)
            .field("sequence", &self.sequence)
            .field("source_guid", &self.source_guid)
            .finish_non_exhaustive()
    }
}
