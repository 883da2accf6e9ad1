//! Conversion between application values and [`Token`]s.
//!
//! The near cache never interprets serialized bytes. It only needs keys turned
//! into tokens (for map lookups and partition placement) and values turned into
//! tokens and back when a cache holds values in the binary format.

use crate::types::Token;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding cached data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization of a key or value failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A token could not be turned back into the requested type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// An object-format cache holds values of a different type than requested.
    #[error("cached object is not a `{expected}`")]
    TypeMismatch { expected: &'static str },
}

/// Serializer seam between the application and the cache.
///
/// Implementations must be deterministic: equal values must produce equal tokens,
/// otherwise lookups and invalidations miss.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a key or value into a token.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be serialized.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Token, CodecError>;

    /// Restores a value from a token.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes do not describe a `T`.
    fn decode<T: DeserializeOwned>(&self, token: &Token) -> Result<T, CodecError>;
}

/// Default codec writing compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Token, CodecError> {
        serde_json::to_vec(value).map(Token::new).map_err(CodecError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, token: &Token) -> Result<T, CodecError> {
        serde_json::from_slice(token.as_bytes()).map_err(CodecError::Decode)
    }
}
