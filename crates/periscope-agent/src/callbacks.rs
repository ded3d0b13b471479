//! Callback registrations and the callback pump.
//!
//! Event handlers and method hooks registered by a client get a
//! monotonically increasing callback token. The closures installed in
//! the runtime fire while the runtime lock is held, so they only
//! enqueue a job; the pump drains jobs on its own task, pins the
//! payload values, and broadcasts one
//! [`CallbackInvocation`] per job to every connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use periscope_runtime::events::HandlerId;
use periscope_runtime::intercept::{InterceptEvent, InterceptorId};
use periscope_runtime::value::{ObjectId, Value};
use periscope_types::value::RemoteValue;
use periscope_types::CallbackToken;
use periscope_wire::messages::CallbackInvocation;

use crate::encode::{lift, now_ms};
use crate::{lock, AgentState};

/// What a callback token is attached to.
pub enum Registration {
    Event { handler: HandlerId },
    Hook { interceptor: InterceptorId },
}

/// Issues callback tokens and maps them to their registrations.
#[derive(Default)]
pub struct CallbackDirectory {
    next_token: CallbackToken,
    map: HashMap<CallbackToken, Registration>,
}

impl CallbackDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next token; tokens are monotonically increasing, never reused.
    pub fn issue(&mut self) -> CallbackToken {
        self.next_token += 1;
        self.next_token
    }

    pub fn register(&mut self, token: CallbackToken, registration: Registration) {
        self.map.insert(token, registration);
    }

    pub fn remove(&mut self, token: CallbackToken) -> Option<Registration> {
        self.map.remove(&token)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A pending callback, captured while the runtime lock was held.
pub enum CallbackJob {
    Event {
        token: CallbackToken,
        sender: ObjectId,
        args: Value,
    },
    Hook {
        token: CallbackToken,
        event: InterceptEvent,
    },
}

/// Drain callback jobs, lifting payloads and broadcasting invocations.
pub fn spawn_pump(
    state: Arc<AgentState>,
    mut jobs: mpsc::UnboundedReceiver<CallbackJob>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let invocation = build_invocation(&state, job);
            match invocation {
                Ok(invocation) => {
                    // No subscribers just means no connected clients.
                    let _ = state.callback_bus.send(invocation);
                }
                Err(fault) => {
                    tracing::warn!(%fault, "callback payload could not be encoded");
                }
            }
        }
        tracing::debug!("callback pump drained");
    })
}

fn build_invocation(
    state: &AgentState,
    job: CallbackJob,
) -> Result<CallbackInvocation, periscope_types::envelope::Fault> {
    let stamp_ms = now_ms();
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);

    let (token, parameters) = match job {
        CallbackJob::Event {
            token,
            sender,
            args,
        } => {
            let sender = lift(&mut rt, &mut pins, Value::Object(sender), stamp_ms)?;
            let args = lift(&mut rt, &mut pins, args, stamp_ms)?;
            (token, vec![sender, args])
        }
        CallbackJob::Hook { token, event } => {
            let instance = match event.instance {
                Some(id) => lift(&mut rt, &mut pins, Value::Object(id), stamp_ms)?,
                None => RemoteValue::null(stamp_ms),
            };
            let mut parameters = vec![instance];
            for arg in event.args {
                parameters.push(lift(&mut rt, &mut pins, arg, stamp_ms)?);
            }
            (token, parameters)
        }
    };

    Ok(CallbackInvocation {
        token,
        stamp_ms,
        parameters,
    })
}
