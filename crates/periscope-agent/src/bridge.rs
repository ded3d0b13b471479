//! The event bridge: subscribing clients to target events.
//!
//! Subscription introspects the event on the pinned object's type,
//! builds the two-argument `(sender, args)` wrapper, and binds it to a
//! callback token. Firings flow through the callback pump as frames on
//! the `/invoke_callback` endpoint. Unsubscription invokes the remove
//! accessor for exactly the wrapper that was added.

use std::sync::Arc;

use periscope_runtime::events::EventHandler;
use periscope_types::envelope::Fault;
use periscope_types::{CallbackToken, Token};
use periscope_wire::messages::EventSubscribeRequest;

use crate::callbacks::{CallbackJob, Registration};
use crate::snapshot::fault_from_runtime;
use crate::{lock, AgentState};

/// Subscribe to an event on a pinned object.
pub fn event_subscribe(
    state: &AgentState,
    request: &EventSubscribeRequest,
) -> Result<CallbackToken, Fault> {
    let mut rt = lock(&state.runtime);
    let object = resolve_pinned(state, request.token)?;

    let mut directory = lock(&state.directory);
    let token = directory.issue();
    let jobs = state.callback_jobs.clone();
    // The wrapper runs while the raising method holds the runtime lock:
    // enqueue only.
    let handler: EventHandler = Arc::new(move |sender, args| {
        let _ = jobs.send(CallbackJob::Event {
            token,
            sender,
            args,
        });
    });

    let handler_id = rt
        .add_event_handler(object, &request.event, handler)
        .map_err(fault_from_runtime)?;
    directory.register(token, Registration::Event { handler: handler_id });

    tracing::info!(event = %request.event, token, "event subscribed");
    Ok(token)
}

/// Remove the handler behind `token`.
pub fn event_unsubscribe(state: &AgentState, token: CallbackToken) -> Result<(), Fault> {
    let mut rt = lock(&state.runtime);
    let mut directory = lock(&state.directory);
    match directory.remove(token) {
        Some(Registration::Event { handler }) => {
            rt.remove_event_handler(handler);
            tracing::info!(token, "event unsubscribed");
            Ok(())
        }
        Some(other) => {
            directory.register(token, other);
            Err(Fault::State(format!(
                "callback token {token} is a hook, not an event subscription"
            )))
        }
        None => Err(Fault::State(format!(
            "callback token {token} is not registered"
        ))),
    }
}

fn resolve_pinned(
    state: &AgentState,
    token: Token,
) -> Result<periscope_runtime::value::ObjectId, Fault> {
    let pins = lock(&state.pins);
    pins.try_get(token)
        .map(|entry| entry.object)
        .ok_or_else(|| Fault::State(format!("token {token} is not pinned")))
}
