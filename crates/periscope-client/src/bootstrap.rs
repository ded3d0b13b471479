//! Agent discovery and the bootstrap contract.
//!
//! The client finds agents through the port-file handshake: every live
//! agent advertises `<data_dir>/agents/<pid>.port`. Validation is a
//! ping over a short-lived connection; files whose port no longer
//! answers are treated as stale and cleaned opportunistically.
//!
//! Injecting an agent into a process that has none is delegated to an
//! external collaborator behind [`Bootstrapper`]; this crate ships only
//! the discovery side.

use periscope_wire::endpoint;
use periscope_wire::handshake;
use periscope_wire::messages::PingResponse;

use crate::connection::Connection;
use crate::{ClientError, Result};

/// The bootstrap contract the client consumes.
pub trait Bootstrapper {
    /// The port of a live agent in `pid`, if one is running.
    fn query_status(&self, pid: u32) -> impl std::future::Future<Output = Result<Option<u16>>> + Send;

    /// Load an agent into `pid` and return its port.
    fn inject(&self, pid: u32) -> impl std::future::Future<Output = Result<u16>> + Send;
}

/// Discovery-only bootstrapper over the port-file handshake.
#[derive(Default)]
pub struct FileHandshake;

impl Bootstrapper for FileHandshake {
    async fn query_status(&self, pid: u32) -> Result<Option<u16>> {
        let path = handshake::port_file(pid);
        if !path.exists() {
            return Ok(None);
        }
        let (_, port) = handshake::parse_port_file(&path)
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if ping_agent(port).await {
            Ok(Some(port))
        } else {
            // Stale advertisement from a dead agent.
            handshake::withdraw(pid);
            Ok(None)
        }
    }

    async fn inject(&self, pid: u32) -> Result<u16> {
        Err(ClientError::NoAgent(format!(
            "process {pid} has no agent and injection is handled by an external bootstrapper"
        )))
    }
}

/// Validate a port with a ping over a throwaway connection.
pub async fn ping_agent(port: u16) -> bool {
    let Ok(conn) = Connection::connect(port).await else {
        return false;
    };
    let outcome = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        conn.call_empty::<PingResponse>(endpoint::PING),
    )
    .await;
    conn.close();
    matches!(outcome, Ok(Ok(response)) if response.status == "pong")
}

/// Every advertised agent that answers a ping, as `(pid, port)` pairs.
pub async fn discover_live() -> Vec<(u32, u16)> {
    let mut live = Vec::new();
    for (pid, port) in handshake::discover() {
        if ping_agent(port).await {
            live.push((pid, port));
        } else {
            handshake::withdraw(pid);
        }
    }
    live
}
