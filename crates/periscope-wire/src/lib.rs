//! # periscope-wire
//!
//! Wire protocol for the Periscope agent/client channel:
//!
//! - **Frame codec** via [`frame`]: 11-byte little-endian header,
//!   buffer-aware incremental parsing
//! - **Endpoint interning** via [`endpoint`]: compile-time FNV-1a map of
//!   the known verbs to canonical strings
//! - **CBOR serialization** helpers via [`cbor`]
//! - **Message bodies** for every endpoint via [`messages`]
//! - **Primitive value encoding** via [`value`]: canonical textual forms
//!   that round-trip, including escaped primitive arrays
//!
//! ## Architecture
//!
//! ```text
//! Request/response structs (messages.rs)
//!     |
//!     v
//! Envelope + CBOR body (cbor.rs)
//!     |
//!     v
//! Frame (frame.rs)   -- [id:u32][type:u8][endpoint_len:u16][body_len:u32] + endpoint + body
//!     |
//!     v
//! TCP stream (loopback only)
//! ```

pub mod cbor;
pub mod endpoint;
pub mod frame;
pub mod handshake;
pub mod messages;
pub mod value;

/// Error types for wire operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Frame header or payload violates the framing rules.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A textual value does not parse as its declared primitive type.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The declared type name is not a known primitive.
    #[error("unknown primitive type: {0}")]
    UnknownPrimitive(String),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WireError::MalformedFrame("short header".to_string());
        assert_eq!(err.to_string(), "malformed frame: short header");
    }
}
