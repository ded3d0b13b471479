//! Wire values: the object-or-token tagged union.
//!
//! Every value that crosses the wire is either a self-describing encoded
//! primitive, a reference to a pinned target object, a type handle, or
//! null. Each value carries the millisecond timestamp it was computed at,
//! which lets the client correlate parallel responses to the snapshot
//! they were taken against.

use serde::{Deserialize, Serialize};

use crate::Token;

/// A value travelling across the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteValue {
    /// Milliseconds since the Unix epoch at which this value was produced.
    pub stamp_ms: u64,
    pub payload: ValuePayload,
}

/// The four shapes a wire value can take.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValuePayload {
    /// The null reference.
    Null,
    /// A primitive in its canonical textual form.
    Encoded { type_name: String, text: String },
    /// A pinned target object, referenced by token.
    Pinned { token: Token, type_name: String },
    /// A handle to a target type rather than an instance.
    TypeHandle {
        assembly: Option<String>,
        full_name: String,
    },
}

impl RemoteValue {
    pub fn null(stamp_ms: u64) -> Self {
        Self {
            stamp_ms,
            payload: ValuePayload::Null,
        }
    }

    pub fn encoded(stamp_ms: u64, type_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            stamp_ms,
            payload: ValuePayload::Encoded {
                type_name: type_name.into(),
                text: text.into(),
            },
        }
    }

    pub fn pinned(stamp_ms: u64, token: Token, type_name: impl Into<String>) -> Self {
        Self {
            stamp_ms,
            payload: ValuePayload::Pinned {
                token,
                type_name: type_name.into(),
            },
        }
    }

    pub fn type_handle(
        stamp_ms: u64,
        assembly: Option<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self {
            stamp_ms,
            payload: ValuePayload::TypeHandle {
                assembly,
                full_name: full_name.into(),
            },
        }
    }

    /// True when the payload is the null reference.
    pub fn is_null(&self) -> bool {
        matches!(self.payload, ValuePayload::Null)
    }

    /// The pin token, when the payload references a pinned object.
    pub fn token(&self) -> Option<Token> {
        match self.payload {
            ValuePayload::Pinned { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Overwrite the timestamp, freezing the value to an event time.
    pub fn restamped(mut self, stamp_ms: u64) -> Self {
        self.stamp_ms = stamp_ms;
        self
    }
}

/// Outcome of a reflective invocation: void, or one wire value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationResult {
    Void,
    Value { returned: RemoteValue },
}

impl InvocationResult {
    /// The returned value, when non-void.
    pub fn returned(&self) -> Option<&RemoteValue> {
        match self {
            InvocationResult::Void => None,
            InvocationResult::Value { returned } => Some(returned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let v = RemoteValue::encoded(7, "System.Int32", "42");
        assert_eq!(v.stamp_ms, 7);
        assert!(!v.is_null());
        assert_eq!(v.token(), None);

        let p = RemoteValue::pinned(8, 99, "Demo.Counter");
        assert_eq!(p.token(), Some(99));

        assert!(RemoteValue::null(0).is_null());
    }

    #[test]
    fn test_restamped() {
        let v = RemoteValue::null(1).restamped(1234);
        assert_eq!(v.stamp_ms, 1234);
    }

    #[test]
    fn test_invocation_result_returned() {
        assert!(InvocationResult::Void.returned().is_none());
        let r = InvocationResult::Value {
            returned: RemoteValue::null(0),
        };
        assert!(r.returned().is_some());
    }
}
