//! Typed application view over a [`CacheStore`].

use super::{CacheStore, CachedValue, NearCacheStats};
use crate::{
    codec::{Codec, CodecError, JsonCodec},
    config::{InMemoryFormat, NearCacheOptions},
    types::Token,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{any::type_name, error::Error, future::Future, marker::PhantomData, sync::Arc};
use thiserror::Error;

/// Errors surfaced by [`NearCache`] operations.
#[derive(Debug, Error)]
pub enum NearCacheError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The value factory passed to `try_get_or_add` failed. Nothing was cached.
    #[error("value fetch failed: {0}")]
    Fetch(#[source] Box<dyn Error + Send + Sync>),
}

/// A near cache of `K -> V`, encoding keys (and binary-format values) with `C`.
///
/// Values come back as `Arc<V>`: object-format caches share the stored value, binary-format
/// caches decode a fresh one on every read.
pub struct NearCache<K, V, C = JsonCodec> {
    store: Arc<CacheStore>,
    codec: C,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V> NearCache<K, V, JsonCodec>
where
    K: Serialize,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self::with_codec(store, JsonCodec)
    }
}

impl<K, V, C> NearCache<K, V, C>
where
    K: Serialize,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    #[must_use]
    pub fn with_codec(store: Arc<CacheStore>, codec: C) -> Self {
        Self { store, codec, _types: PhantomData }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.store.name()
    }

    #[must_use]
    pub fn options(&self) -> &NearCacheOptions {
        self.store.options()
    }

    /// The untyped store behind this view.
    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    #[must_use]
    pub fn statistics(&self) -> NearCacheStats {
        self.store.stats()
    }

    /// Caches `value` unless `key` is already present.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheError::Codec`] if the key or value cannot be encoded.
    pub fn try_add(&self, key: &K, value: V) -> Result<bool, NearCacheError> {
        let token = self.codec.encode(key)?;
        let value = self.to_cached(value)?;
        Ok(self.store.try_add(token, Some(value)))
    }

    /// Reads a cached value.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheError::Codec`] if the key cannot be encoded or the cached value
    /// cannot be turned back into a `V`.
    pub fn try_get(&self, key: &K) -> Result<Option<Arc<V>>, NearCacheError> {
        let token = self.codec.encode(key)?;
        self.store.try_get(&token, true).map(|value| self.from_cached(value)).transpose()
    }

    /// Reads a cached value, or loads and caches it with `fetch` on a miss.
    ///
    /// Concurrent calls for the same key run `fetch` once. A `None` result is returned
    /// without being cached.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheError::Fetch`] with the factory's error, or
    /// [`NearCacheError::Codec`] for encoding failures.
    pub async fn try_get_or_add<F, Fut, E>(
        &self,
        key: &K,
        fetch: F,
    ) -> Result<Option<Arc<V>>, NearCacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let token = self.codec.encode(key)?;
        let (_, value) = self
            .store
            .try_get_or_add(token, |_| async move {
                let loaded = fetch().await.map_err(|e| NearCacheError::Fetch(e.into()))?;
                Ok::<_, NearCacheError>(loaded.map(|value| self.to_cached(value)).transpose()?)
            })
            .await?;
        value.map(|value| self.from_cached(value)).transpose()
    }

    /// Whether a live entry exists for `key`, without counting a hit.
    ///
    /// # Errors
    ///
    /// Returns [`NearCacheError::Codec`] if the key cannot be encoded.
    pub fn contains_key(&self, key: &K) -> Result<bool, NearCacheError> {
        let token = self.codec.encode(key)?;
        Ok(self.store.contains_key(&token, false))
    }

    /// # Errors
    ///
    /// Returns [`NearCacheError::Codec`] if the key cannot be encoded.
    pub fn remove(&self, key: &K) -> Result<bool, NearCacheError> {
        let token = self.codec.encode(key)?;
        Ok(self.store.remove(&token))
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    fn to_cached(&self, value: V) -> Result<CachedValue, CodecError> {
        match self.store.options().in_memory_format {
            InMemoryFormat::Binary => self.codec.encode(&value).map(CachedValue::Data),
            InMemoryFormat::Object => Ok(CachedValue::Object(Arc::new(value))),
        }
    }

    fn from_cached(&self, value: CachedValue) -> Result<Arc<V>, NearCacheError> {
        match value {
            CachedValue::Data(token) => Ok(Arc::new(self.decode(&token)?)),
            CachedValue::Object(object) => object
                .downcast::<V>()
                .map_err(|_| CodecError::TypeMismatch { expected: type_name::<V>() }.into()),
        }
    }

    fn decode(&self, token: &Token) -> Result<V, CodecError> {
        self.codec.decode(token)
    }
}

impl<K, V, C: Clone> Clone for NearCache<K, V, C> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), codec: self.codec.clone(), _types: PhantomData }
    }
}

impl<K, V, C> std::fmt::Debug for NearCache<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("store", &self.store)
            .field("value_type", &type_name::<V>())
            .finish_non_exhaustive()
    }
}
