//! # periscope-client
//!
//! The out-of-process driver for a Periscope agent.
//!
//! - **Multiplexed connection** via [`connection`]: one reader and one
//!   batched writer per connection, responses correlated by id
//! - **Callback listener** via [`listener`]: demultiplexes inbound
//!   callback frames to event and hook handlers
//! - **Remote-object proxies** via [`proxy`]: ref-counted stand-ins
//!   whose member accesses round-trip over the wire
//! - **Proxy cache** via [`cache`]: weak, keyed by token, with the
//!   evict-and-suppress protocol
//! - **Type cache** via [`typecache`]: lazy type descriptors
//! - **Bootstrap** via [`bootstrap`]: agent discovery over port files
//! - **Client facade** via [`client`]: the high-level API and the
//!   process-wide instance

pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod connection;
pub mod listener;
pub mod proxy;
pub mod typecache;

pub use client::Client;
pub use proxy::{CallArg, ClientValue, RemoteObject};

use periscope_types::envelope::Fault;

/// Error types for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection lost or never established.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request future was abandoned by connection teardown.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// No response within the per-request budget.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The agent answered with an error envelope.
    #[error(transparent)]
    Agent(#[from] Fault),

    /// Body encoding or decoding failed on this side.
    #[error("codec error: {0}")]
    Codec(String),

    /// The proxy is released or its connection is gone.
    #[error("object disposed")]
    Disposed,

    /// No live agent could be discovered.
    #[error("no live agent found: {0}")]
    NoAgent(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_fault_passes_through() {
        let err: ClientError = Fault::State("object moved or invalid".to_string()).into();
        assert_eq!(err.to_string(), "state error: object moved or invalid");
    }
}
