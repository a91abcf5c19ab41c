//! Value encoding for the Redis tier
//!
//! The remote tier stores opaque bytes; this module defines the codec seam
//! and the default JSON implementation. Polymorphic values round-trip through
//! serde's tagged enums: declaring the concrete variant set as an enum with
//! `#[serde(tag = "type")]` embeds a discriminator in the payload, so
//! decoding restores the same concrete variant that was encoded.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encoding/decoding of cached values
///
/// Implementations must be symmetric: for any supported `v`,
/// `decode(encode(v))` is observationally equal to `v`. The encoding is also
/// part of the invalidation wire contract, so all instances sharing a
/// namespace must agree on it.
pub trait CacheCodec: Send + Sync {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    fn name(&self) -> &'static str;
}

/// Default codec backed by `serde_json`
///
/// Floats are emitted with shortest-round-trip precision, so `f64`/`f32`
/// values decode bit-equal. `Option::None` fields are omitted when the type
/// uses `skip_serializing_if`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
