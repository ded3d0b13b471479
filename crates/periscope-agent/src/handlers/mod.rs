//! Endpoint handlers.
//!
//! Each submodule implements the handlers for one endpoint group. A
//! handler parses its own CBOR body, does its work under the state
//! locks, and returns `Result<T, Fault>`; the router wraps the outcome
//! in the wire envelope.

pub mod heap;
pub mod invoke;
pub mod meta;
pub mod types;

use serde::de::DeserializeOwned;

use periscope_types::envelope::Fault;

/// Decode a handler's request body.
pub(crate) fn parse<T: DeserializeOwned>(body: &[u8], endpoint: &str) -> Result<T, Fault> {
    periscope_wire::cbor::from_slice_for(body, endpoint)
        .map_err(|e| Fault::Protocol(e.to_string()))
}

/// Decode a request body, treating an empty body as the default.
pub(crate) fn parse_or_default<T: DeserializeOwned + Default>(
    body: &[u8],
    endpoint: &str,
) -> Result<T, Fault> {
    if body.is_empty() {
        Ok(T::default())
    } else {
        parse(body, endpoint)
    }
}
