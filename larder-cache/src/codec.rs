//! Value codecs.
//!
//! One codec per [`Representation`]. The orchestrator is generic over the
//! codec, so structured and binary values share a single code path and the
//! representation is chosen by type, not by inspecting values at runtime.

use std::marker::PhantomData;

use larder_core::{media, CodecError, LarderResult, Representation, StorageId};
use serde::{de::DeserializeOwned, Serialize};

/// Converts between a value and its stored bytes.
pub trait ValueCodec {
    /// The caller-facing value type.
    type Value: Send;

    /// Representation tag, which also selects the storage id suffix.
    const REPRESENTATION: Representation;

    fn encode(id: &StorageId, value: &Self::Value) -> LarderResult<Vec<u8>>;

    fn decode(id: &StorageId, bytes: &[u8]) -> LarderResult<Self::Value>;

    /// Media type for a freshly produced value when none is known yet.
    fn infer_mime_type(_value: &Self::Value) -> String {
        Self::REPRESENTATION.default_mime_type().to_string()
    }
}

/// Structured values as pretty-printed JSON.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> ValueCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    type Value = T;

    const REPRESENTATION: Representation = Representation::Structured;

    fn encode(id: &StorageId, value: &T) -> LarderResult<Vec<u8>> {
        encode_json(id, value)
    }

    fn decode(id: &StorageId, bytes: &[u8]) -> LarderResult<T> {
        serde_json::from_slice(bytes).map_err(|e| {
            CodecError::Decode {
                id: id.to_string(),
                representation: Self::REPRESENTATION.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Raw bytes, passed through untouched.
pub struct BinaryCodec;

impl ValueCodec for BinaryCodec {
    type Value = Vec<u8>;

    const REPRESENTATION: Representation = Representation::Binary;

    fn encode(_id: &StorageId, value: &Vec<u8>) -> LarderResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(_id: &StorageId, bytes: &[u8]) -> LarderResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn infer_mime_type(value: &Vec<u8>) -> String {
        media::sniff(value)
            .unwrap_or(media::APPLICATION_OCTET_STREAM)
            .to_string()
    }
}

/// Encode any serializable value the way structured entries are stored.
pub fn encode_json<T: Serialize + ?Sized>(id: &StorageId, value: &T) -> LarderResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| {
        CodecError::Encode {
            id: id.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
