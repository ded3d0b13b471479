//! The request router: endpoint to handler, outcome to envelope.
//!
//! Handlers never throw into the connection loops: every fault is
//! converted to the wire envelope here, and an unknown endpoint is just
//! another protocol fault.

use std::sync::Arc;

use serde::Serialize;

use periscope_types::envelope::{Envelope, Fault};
use periscope_wire::{cbor, endpoint};

use crate::{bridge, handlers, hooks, AgentState};

/// Dispatch one request body; returns the CBOR-encoded envelope.
pub async fn dispatch(state: &Arc<AgentState>, endpoint_name: &str, body: &[u8]) -> Vec<u8> {
    tracing::debug!(endpoint = endpoint_name, body_len = body.len(), "request");
    match endpoint_name {
        endpoint::PING => respond(handlers::meta::ping(state)),
        endpoint::DIE => respond(handlers::meta::die(state, body)),
        endpoint::REGISTER_CLIENT => respond(handlers::meta::register_client(state, body)),
        endpoint::UNREGISTER_CLIENT => respond(handlers::meta::unregister_client(state, body)),
        endpoint::DOMAINS => respond(handlers::types::domains(state)),
        endpoint::TYPES => respond(handlers::types::types(state, body)),
        endpoint::TYPE => respond(handlers::types::type_dump(state, body)),
        endpoint::HEAP => respond(handlers::heap::heap(state, body)),
        endpoint::OBJECT => respond(handlers::heap::object(state, body)),
        endpoint::UNPIN => respond(handlers::heap::unpin(state, body)),
        endpoint::CREATE_OBJECT => respond(handlers::invoke::create_object(state, body)),
        endpoint::INVOKE => respond(handlers::invoke::invoke(state, body).await),
        endpoint::GET_FIELD => respond(handlers::invoke::get_field(state, body)),
        endpoint::SET_FIELD => respond(handlers::invoke::set_field(state, body)),
        endpoint::GET_ITEM => respond(handlers::invoke::get_item(state, body)),
        endpoint::EVENT_SUBSCRIBE => respond(subscribe(state, body)),
        endpoint::EVENT_UNSUBSCRIBE => respond(unsubscribe(state, body)),
        endpoint::HOOK_METHOD => respond(hook(state, body)),
        endpoint::UNHOOK_METHOD => respond(unhook(state, body)),
        other => respond::<()>(Err(Fault::Protocol(format!("unknown endpoint '{other}'")))),
    }
}

fn subscribe(
    state: &Arc<AgentState>,
    body: &[u8],
) -> Result<periscope_wire::messages::CallbackTokenResponse, Fault> {
    let request = handlers::parse(body, endpoint::EVENT_SUBSCRIBE)?;
    let token = bridge::event_subscribe(state, &request)?;
    Ok(periscope_wire::messages::CallbackTokenResponse { token })
}

fn unsubscribe(
    state: &Arc<AgentState>,
    body: &[u8],
) -> Result<periscope_wire::messages::StatusResponse, Fault> {
    let request: periscope_wire::messages::EventUnsubscribeRequest =
        handlers::parse(body, endpoint::EVENT_UNSUBSCRIBE)?;
    bridge::event_unsubscribe(state, request.token)?;
    Ok(periscope_wire::messages::StatusResponse::ok())
}

fn hook(
    state: &Arc<AgentState>,
    body: &[u8],
) -> Result<periscope_wire::messages::CallbackTokenResponse, Fault> {
    let request = handlers::parse(body, endpoint::HOOK_METHOD)?;
    let token = hooks::hook_method(state, &request)?;
    Ok(periscope_wire::messages::CallbackTokenResponse { token })
}

fn unhook(
    state: &Arc<AgentState>,
    body: &[u8],
) -> Result<periscope_wire::messages::StatusResponse, Fault> {
    let request: periscope_wire::messages::UnhookMethodRequest =
        handlers::parse(body, endpoint::UNHOOK_METHOD)?;
    hooks::unhook_method(state, request.token)?;
    Ok(periscope_wire::messages::StatusResponse::ok())
}

/// Serialize a handler outcome as the wire envelope.
fn respond<T: Serialize>(outcome: Result<T, Fault>) -> Vec<u8> {
    let envelope = match outcome {
        Ok(data) => Envelope::ok(data),
        Err(fault) => {
            tracing::debug!(%fault, "request failed");
            Envelope::fault(&fault)
        }
    };
    cbor::to_vec(&envelope).unwrap_or_else(|err| {
        // The error envelope itself must always serialize; a data value
        // that cannot is reported as a protocol fault instead.
        tracing::error!(%err, "response body failed to serialize");
        let fallback =
            Envelope::<()>::fault(&Fault::Protocol("response failed to serialize".to_string()));
        cbor::to_vec(&fallback).unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_runtime::runtime::RuntimeCore;
    use periscope_wire::messages::PingResponse;
    use std::sync::Mutex;

    fn state() -> Arc<AgentState> {
        let runtime = Arc::new(Mutex::new(RuntimeCore::new("test")));
        AgentState::new(crate::config::AgentConfig::default(), runtime).0
    }

    #[tokio::test]
    async fn test_ping_roundtrip_through_router() {
        let bytes = dispatch(&state(), endpoint::PING, &[]).await;
        let envelope: Envelope<PingResponse> = cbor::from_slice(&bytes).expect("decode");
        let response = envelope.into_result().expect("ok");
        assert_eq!(response.status, "pong");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_protocol_fault() {
        let bytes = dispatch(&state(), "/nonsense", &[]).await;
        let envelope: Envelope<()> = cbor::from_slice(&bytes).expect("decode");
        let fault = envelope.into_result().expect_err("fault");
        assert!(matches!(fault, Fault::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_fault() {
        let bytes = dispatch(&state(), endpoint::TYPES, &[0xFF, 0x01]).await;
        let envelope: Envelope<periscope_wire::messages::TypesResponse> =
            cbor::from_slice(&bytes).expect("decode");
        assert!(matches!(
            envelope.into_result(),
            Err(Fault::Protocol(_))
        ));
    }
}
