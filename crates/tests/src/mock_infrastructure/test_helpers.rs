//! Test Helper Functions and Utilities
//!
//! Common helpers for creating keys, values and logging in tests.

use nearcache_core::{
    cache::CachedValue,
    types::{PartitionId, Token},
};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[must_use]
pub fn key(name: &str) -> Token {
    Token::new(name.as_bytes().to_vec())
}

#[must_use]
pub fn value(bytes: &[u8]) -> Option<CachedValue> {
    Some(CachedValue::Data(Token::new(bytes.to_vec())))
}

/// Bytes of a binary cached value.
///
/// # Panics
///
/// Panics on an object-format value.
#[must_use]
pub fn data_of(value: &CachedValue) -> Vec<u8> {
    match value {
        CachedValue::Data(token) => token.as_bytes().to_vec(),
        CachedValue::Object(_) => panic!("expected binary value"),
    }
}

/// The first `count` keys of the form `key-N` that fall into `partition_id`.
#[must_use]
pub fn keys_in_partition(
    partition_of: impl Fn(&Token) -> PartitionId,
    partition_id: PartitionId,
    count: usize,
) -> Vec<Token> {
    (0..)
        .map(|i| key(&format!("key-{i}")))
        .filter(|token| partition_of(token) == partition_id)
        .take(count)
        .collect()
}
