//! Binary payload codec.
//!
//! Payloads, saga state and cached inbox responses are stored as opaque
//! bytes. Typed helpers throughout the crate encode them with bitcode.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DispatchError;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DispatchError> {
    bitcode::serialize(value).map_err(|e| DispatchError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DispatchError> {
    bitcode::deserialize(bytes).map_err(|e| DispatchError::Decode(e.to_string()))
}
