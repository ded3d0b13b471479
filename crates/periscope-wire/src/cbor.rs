//! CBOR serialization helpers for frame bodies.
//!
//! This module wraps [`ciborium`] to serialize and deserialize message
//! bodies to/from CBOR (RFC 8949). Every request and response body on the
//! wire is CBOR: a compact, self-describing binary encoding that needs no
//! out-of-band schema.

use serde::{de::DeserializeOwned, Serialize};

use crate::WireError;

/// Serialize a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`WireError::Serialization`] if the value cannot be serialized.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| WireError::Serialization(format!("CBOR serialization failed: {e}")))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`WireError::Deserialization`] if the bytes cannot be
/// deserialized into the target type.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(data)
        .map_err(|e| WireError::Deserialization(format!("CBOR deserialization failed: {e}")))
}

/// Deserialize with the endpoint name included in the error for debugging.
pub fn from_slice_for<T: DeserializeOwned>(data: &[u8], endpoint: &str) -> Result<T, WireError> {
    ciborium::from_reader(data).map_err(|e| {
        WireError::Deserialization(format!("CBOR body for {endpoint} failed to decode: {e}"))
    })
}
