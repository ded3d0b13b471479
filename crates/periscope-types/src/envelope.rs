//! The response envelope and its fault taxonomy.
//!
//! Every response body is wrapped in an [`Envelope`]. Handler failures of
//! any kind are flattened into `{is_error, error_message, error_stack}`;
//! the [`Fault`] prefix in the message lets the client recover the
//! category without extra wire fields.

use serde::{Deserialize, Serialize};

/// Classified failure carried across the wire.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum Fault {
    /// Malformed frame, unknown endpoint, or malformed body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Type, method, field, property, or event not found.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// The target's method threw; carries the target exception.
    #[error("invocation error: {message}")]
    Invocation { message: String, stack: String },

    /// Object moved or invalid, token not pinned, or object disposed.
    #[error("state error: {0}")]
    State(String),

    /// Connection lost, request cancelled, or timed out.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Fault {
    /// The target-side stack trace, when one was captured.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Fault::Invocation { stack, .. } => Some(stack),
            _ => None,
        }
    }

    /// Reconstruct a fault from envelope fields.
    ///
    /// The category is recovered from the message prefix written by
    /// [`Fault`]'s `Display`; an unprefixed message is a protocol error
    /// from an older or foreign agent.
    pub fn from_wire(message: String, stack: Option<String>) -> Self {
        if let Some(rest) = message.strip_prefix("resolution error: ") {
            Fault::Resolution(rest.to_string())
        } else if let Some(rest) = message.strip_prefix("invocation error: ") {
            Fault::Invocation {
                message: rest.to_string(),
                stack: stack.unwrap_or_default(),
            }
        } else if let Some(rest) = message.strip_prefix("state error: ") {
            Fault::State(rest.to_string())
        } else if let Some(rest) = message.strip_prefix("transport error: ") {
            Fault::Transport(rest.to_string())
        } else if let Some(rest) = message.strip_prefix("protocol error: ") {
            Fault::Protocol(rest.to_string())
        } else {
            Fault::Protocol(message)
        }
    }
}

/// Wire envelope around every response body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// A successful envelope carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            is_error: false,
            error_message: None,
            error_stack: None,
            data: Some(data),
        }
    }

    /// An error envelope for `fault`.
    pub fn fault(fault: &Fault) -> Self {
        Self {
            is_error: true,
            error_message: Some(fault.to_string()),
            error_stack: fault.stack().map(str::to_string),
            data: None,
        }
    }

    /// Unwrap into the carried data or the reconstructed fault.
    ///
    /// A success envelope with no data is a protocol error: the agent
    /// must send `data` for every non-void response.
    pub fn into_result(self) -> Result<T, Fault> {
        if self.is_error {
            Err(Fault::from_wire(
                self.error_message.unwrap_or_else(|| "unspecified agent error".to_string()),
                self.error_stack,
            ))
        } else {
            self.data
                .ok_or_else(|| Fault::Protocol("success envelope with no data".to_string()))
        }
    }
}
