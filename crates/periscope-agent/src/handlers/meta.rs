//! Agent lifecycle handlers: ping, client registry, die.

use std::sync::Arc;
use std::time::Duration;

use periscope_types::envelope::Fault;
use periscope_wire::endpoint;
use periscope_wire::messages::{
    DieRequest, PingResponse, RegisterClientRequest, StatusResponse, UnregisterClientRequest,
    UnregisterClientResponse,
};

use crate::{lock, AgentState};

pub fn ping(_state: &Arc<AgentState>) -> Result<PingResponse, Fault> {
    Ok(PingResponse {
        status: "pong".to_string(),
    })
}

pub fn register_client(state: &Arc<AgentState>, body: &[u8]) -> Result<StatusResponse, Fault> {
    let request: RegisterClientRequest = super::parse(body, endpoint::REGISTER_CLIENT)?;
    lock(&state.clients).insert(request.process_id);
    tracing::info!(process_id = request.process_id, "client registered");
    Ok(StatusResponse::ok())
}

pub fn unregister_client(
    state: &Arc<AgentState>,
    body: &[u8],
) -> Result<UnregisterClientResponse, Fault> {
    let request: UnregisterClientRequest = super::parse(body, endpoint::UNREGISTER_CLIENT)?;
    let mut clients = lock(&state.clients);
    let removed = clients.remove(&request.process_id);
    let remaining = clients.len() as u32;
    tracing::info!(
        process_id = request.process_id,
        removed,
        remaining,
        "client unregistered"
    );
    Ok(UnregisterClientResponse { removed, remaining })
}

/// Shut the agent down, unless clients remain and `force` is unset.
pub fn die(state: &Arc<AgentState>, body: &[u8]) -> Result<StatusResponse, Fault> {
    let request: DieRequest = super::parse_or_default(body, endpoint::DIE)?;
    let remaining = lock(&state.clients).len();
    if remaining > 0 && !request.force {
        return Err(Fault::State(format!(
            "{remaining} client(s) still registered; pass force to shut down anyway"
        )));
    }

    // Let the acknowledgement reach the wire before tearing down.
    let shutdown = state.shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = shutdown.send(());
    });
    tracing::info!(forced = request.force, "shutdown requested");
    Ok(StatusResponse {
        status: "dying".to_string(),
    })
}
