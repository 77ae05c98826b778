//! Value codecs.
//!
//! The archive stores opaque bytes. A [`Codec`] turns caller values into
//! those bytes and back; decoding failures are reported with the codec's
//! [`Codec::NAME`] so callers can tell which representation was expected.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Encode/decode capability for values stored in slots.
pub trait Codec: 'static {
    /// The decoded value type.
    type Value: Send + 'static;

    /// Name reported in `DecodeFailed`.
    const NAME: &'static str;

    /// Encode a value to bytes.
    fn encode(value: &Self::Value) -> Result<Vec<u8>>;

    /// Decode bytes, returning `None` if they do not hold a valid value.
    fn decode(bytes: &[u8]) -> Option<Self::Value>;
}

/// Identity codec for raw bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Value = Vec<u8>;

    const NAME: &'static str = "raw";

    fn encode(value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(bytes: &[u8]) -> Option<Vec<u8>> {
        Some(bytes.to_vec())
    }
}

/// JSON codec for any serde type.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    const NAME: &'static str = "json";

    fn encode(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(bytes: &[u8]) -> Option<T> {
        serde_json::from_slice(bytes).ok()
    }
}

/// MessagePack codec for any serde type.
pub struct MessagePackCodec<T>(PhantomData<fn() -> T>);

impl<T> Codec for MessagePackCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    const NAME: &'static str = "msgpack";

    fn encode(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(bytes: &[u8]) -> Option<T> {
        rmp_serde::from_slice(bytes).ok()
    }
}
