//! # periscope-types
//!
//! Shared domain types used across the Periscope workspace: pin tokens,
//! type and member descriptors, wire values, invocation results, and the
//! response envelope with its fault taxonomy.

pub mod descriptor;
pub mod envelope;
pub mod value;

/// Identity of a pinned object for the lifetime of its pin. Zero is "null".
pub type Token = u64;

/// The null token.
pub const NULL_TOKEN: Token = 0;

/// Address of an object on the target heap. Unstable across compactions.
pub type Address = u64;

/// Per-type method-table identifier, stable for the runtime's lifetime.
pub type MethodTable = u64;

/// Identifier of a client-registered event handler or method hook.
/// Issued by the agent, monotonically increasing.
pub type CallbackToken = u64;

/// Hook positions relative to the target method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPosition {
    Prefix,
    Postfix,
    Finalizer,
}

impl std::fmt::Display for HookPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPosition::Prefix => write!(f, "prefix"),
            HookPosition::Postfix => write!(f, "postfix"),
            HookPosition::Finalizer => write!(f, "finalizer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_token_is_zero() {
        assert_eq!(NULL_TOKEN, 0);
    }

    #[test]
    fn test_hook_position_display() {
        assert_eq!(HookPosition::Prefix.to_string(), "prefix");
        assert_eq!(HookPosition::Postfix.to_string(), "postfix");
        assert_eq!(HookPosition::Finalizer.to_string(), "finalizer");
    }
}
