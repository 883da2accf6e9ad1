//! Core value types shared by the cache, repair and cluster layers.
//!
//! # Type Categories
//!
//! ## Tokens
//! - [`Token`]: opaque serialized key or value, compared byte-for-byte
//! - Carries a cached partition hash so partition lookups never rehash
//!
//! ## Cluster Identity
//! - [`MemberInfo`]: a cluster member as reported by membership
//! - [`PartitionId`], [`SubscriptionId`]: plain aliases used on every seam

use crate::utils::{murmur3_x86_32, DEFAULT_MURMUR_SEED};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use uuid::Uuid;

/// Index into the partition table.
pub type PartitionId = usize;

/// Handle returned by an invalidation subscription.
pub type SubscriptionId = Uuid;

/// Opaque, immutable serialized form of a key or value.
///
/// Cloning is a reference count bump. Equality and hashing cover only the
/// bytes; the partition hash is derived data.
#[derive(Clone)]
pub struct Token {
    bytes: Arc<[u8]>,
    partition_hash: i32,
}

impl Token {
    /// Wraps serialized bytes, hashing them for partition placement.
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let partition_hash = murmur3_x86_32(&bytes, DEFAULT_MURMUR_SEED);
        Self { bytes, partition_hash }
    }

    /// Wraps serialized bytes whose producer already computed the partition hash
    /// (for example a partition-aware key).
    #[must_use]
    pub fn with_partition_hash(bytes: impl Into<Arc<[u8]>>, partition_hash: i32) -> Self {
        Self { bytes: bytes.into(), partition_hash }
    }

    /// Synthetic token used to place map-wide events, derived from the cache name.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        Self::new(name.as_bytes())
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    #[inline]
    pub fn partition_hash(&self) -> i32 {
        self.partition_hash
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes) || self.bytes == other.bytes
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("len", &self.bytes.len())
            .field("partition_hash", &self.partition_hash)
            .finish()
    }
}

impl From<Vec<u8>> for Token {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Token {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

/// A cluster member the client can query for invalidation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: Uuid,
    pub address: String,
}

impl MemberInfo {
    #[must_use]
    pub fn new(id: Uuid, address: impl Into<String>) -> Self {
        Self { id, address: address.into() }
    }
}
