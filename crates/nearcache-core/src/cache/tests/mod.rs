//! Store and façade tests.
//!
//! - `store_tests`: add/get/remove semantics, expiry, eviction and statistics
//! - `concurrency_tests`: single-flight fetches and concurrent writers
//! - `near_cache_tests`: typed façade over both in-memory formats


use crate::{
    cache::{CacheStore, CachedValue},
    config::{EvictionPolicy, NearCacheOptions},
    types::Token,
};
use std::sync::Arc;

pub(crate) fn key(name: &str) -> Token {
    Token::new(name.as_bytes().to_vec())
}

pub(crate) fn value(bytes: &[u8]) -> Option<CachedValue> {
    Some(CachedValue::Data(Token::new(bytes.to_vec())))
}

pub(crate) fn data_of(value: &CachedValue) -> Vec<u8> {
    match value {
        CachedValue::Data(token) => token.as_bytes().to_vec(),
        CachedValue::Object(_) => panic!("expected binary value"),
    }
}

pub(crate) fn create_store(options: NearCacheOptions) -> Arc<CacheStore> {
    Arc::new(CacheStore::new("test-cache", options))
}

pub(crate) fn bounded(max_size: usize, eviction_policy: EvictionPolicy) -> NearCacheOptions {
    NearCacheOptions { max_size, eviction_policy, ..Default::default() }
}
