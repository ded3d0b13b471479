//! # periscope-runtime
//!
//! The managed object model a Periscope agent attaches to.
//!
//! A hosted application builds a [`runtime::RuntimeCore`], registers its
//! assemblies and classes (method bodies are native closures), allocates
//! objects on the managed [`heap`], and raises events. The agent then
//! inspects and manipulates that world: it walks heap snapshots, resolves
//! types, invokes methods through [`class::MethodSlot`]s, roots objects
//! against collection, and installs [`intercept`] callbacks around method
//! bodies.
//!
//! Object *identity* ([`value::ObjectId`]) is stable for an object's
//! lifetime; its heap *address* is not. Compaction relocates objects and
//! bumps the heap generation, which is how the moved-object protocol
//! arises.

pub mod class;
pub mod events;
pub mod heap;
pub mod intercept;
pub mod runtime;
pub mod value;

/// Error types for runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Type not found during resolution.
    #[error("type '{0}' not found in {1}")]
    TypeNotFound(String, String),

    /// Member not found on a type.
    #[error("{kind} '{name}' not found on type '{type_name}'")]
    MemberNotFound {
        kind: &'static str,
        name: String,
        type_name: String,
    },

    /// The object id refers to no live object.
    #[error("object {0:?} is not alive")]
    DeadObject(value::ObjectId),

    /// The address does not hold an object with the expected method table.
    #[error("object moved or invalid at address 0x{0:x}")]
    Moved(u64),

    /// A heap walk observed relocation mid-walk.
    #[error("heap walk inconsistent: generation changed during enumeration")]
    InconsistentWalk,

    /// A method body raised a target-level exception.
    #[error("target exception: {message}")]
    TargetException { message: String, stack: String },

    /// Argument mismatch on invocation.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A by-ref sentinel argument was used by an interceptor.
    #[error("argument is a non-proxyable sentinel and cannot be read")]
    PoisonedArgument,

    /// Internal invariant violation.
    #[error("internal runtime error: {0}")]
    Internal(String),
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Match `name` against `pattern`, where `*` matches any character run.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                // Swallow the star greedily, backing off one byte at a time.
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_exact() {
        assert!(wildcard_match("Demo.Counter", "Demo.Counter"));
        assert!(!wildcard_match("Demo.Counter", "Demo.Counters"));
        assert!(!wildcard_match("Demo.Counters", "Demo.Counter"));
    }

    #[test]
    fn test_wildcard_star() {
        assert!(wildcard_match("Demo.*", "Demo.Counter"));
        assert!(wildcard_match("*.Counter", "Demo.Counter"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("Demo.*er", "Demo.Counter"));
        assert!(!wildcard_match("Demo.*", "Other.Counter"));
    }

    #[test]
    fn test_wildcard_multiple_stars() {
        assert!(wildcard_match("*Coun*er*", "Demo.Counter"));
        assert!(!wildcard_match("*Vault*", "Demo.Counter"));
    }
}
