//! Object codecs
//!
//! A codec turns typed objects into the byte values a collection stores
//! and back.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Marshal/unmarshal pair used by `Collection::set_object`/`get_object`
///
/// The two halves are swapped together with `Collection::with_codec`; to
/// change only one of them, implement `Codec` and delegate the other half.
pub trait Codec: Send + Sync {
    fn marshal<T: Serialize + ?Sized>(&self, object: &T) -> Result<Vec<u8>, CodecError>;

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON text, the default codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn marshal<T: Serialize + ?Sized>(&self, object: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(object)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding via bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn marshal<T: Serialize + ?Sized>(&self, object: &T) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(object)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
