//! Endpoint names and their compile-time interning table.
//!
//! Endpoints are small, short-lived strings drawn from a fixed set of
//! verbs. Parsing a frame on a hot path should not allocate for a known
//! endpoint, so the codec hashes the incoming bytes with FNV-1a and maps
//! the hash back to the canonical `&'static str`. Unknown endpoints are
//! accepted and allocated normally; the router rejects them later with a
//! protocol fault.

use std::borrow::Cow;

pub const PING: &str = "/ping";
pub const DIE: &str = "/die";
pub const REGISTER_CLIENT: &str = "/register_client";
pub const UNREGISTER_CLIENT: &str = "/unregister_client";
pub const DOMAINS: &str = "/domains";
pub const TYPES: &str = "/types";
pub const TYPE: &str = "/type";
pub const HEAP: &str = "/heap";
pub const OBJECT: &str = "/object";
pub const CREATE_OBJECT: &str = "/create_object";
pub const INVOKE: &str = "/invoke";
pub const GET_FIELD: &str = "/get_field";
pub const SET_FIELD: &str = "/set_field";
pub const GET_ITEM: &str = "/get_item";
pub const UNPIN: &str = "/unpin";
pub const EVENT_SUBSCRIBE: &str = "/event_subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "/event_unsubscribe";
pub const HOOK_METHOD: &str = "/hook_method";
pub const UNHOOK_METHOD: &str = "/unhook_method";
pub const INVOKE_CALLBACK: &str = "/invoke_callback";

/// All known endpoints, in dispatch-table order.
pub const ALL: &[&str] = &[
    PING,
    DIE,
    REGISTER_CLIENT,
    UNREGISTER_CLIENT,
    DOMAINS,
    TYPES,
    TYPE,
    HEAP,
    OBJECT,
    CREATE_OBJECT,
    INVOKE,
    GET_FIELD,
    SET_FIELD,
    GET_ITEM,
    UNPIN,
    EVENT_SUBSCRIBE,
    EVENT_UNSUBSCRIBE,
    HOOK_METHOD,
    UNHOOK_METHOD,
    INVOKE_CALLBACK,
];

/// 64-bit FNV-1a over a byte string, usable in const context.
pub const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

const H_PING: u64 = fnv1a(PING.as_bytes());
const H_DIE: u64 = fnv1a(DIE.as_bytes());
const H_REGISTER_CLIENT: u64 = fnv1a(REGISTER_CLIENT.as_bytes());
const H_UNREGISTER_CLIENT: u64 = fnv1a(UNREGISTER_CLIENT.as_bytes());
const H_DOMAINS: u64 = fnv1a(DOMAINS.as_bytes());
const H_TYPES: u64 = fnv1a(TYPES.as_bytes());
const H_TYPE: u64 = fnv1a(TYPE.as_bytes());
const H_HEAP: u64 = fnv1a(HEAP.as_bytes());
const H_OBJECT: u64 = fnv1a(OBJECT.as_bytes());
const H_CREATE_OBJECT: u64 = fnv1a(CREATE_OBJECT.as_bytes());
const H_INVOKE: u64 = fnv1a(INVOKE.as_bytes());
const H_GET_FIELD: u64 = fnv1a(GET_FIELD.as_bytes());
const H_SET_FIELD: u64 = fnv1a(SET_FIELD.as_bytes());
const H_GET_ITEM: u64 = fnv1a(GET_ITEM.as_bytes());
const H_UNPIN: u64 = fnv1a(UNPIN.as_bytes());
const H_EVENT_SUBSCRIBE: u64 = fnv1a(EVENT_SUBSCRIBE.as_bytes());
const H_EVENT_UNSUBSCRIBE: u64 = fnv1a(EVENT_UNSUBSCRIBE.as_bytes());
const H_HOOK_METHOD: u64 = fnv1a(HOOK_METHOD.as_bytes());
const H_UNHOOK_METHOD: u64 = fnv1a(UNHOOK_METHOD.as_bytes());
const H_INVOKE_CALLBACK: u64 = fnv1a(INVOKE_CALLBACK.as_bytes());

/// Map endpoint bytes to the canonical static string without allocating,
/// falling back to an owned string for unknown endpoints.
///
/// The hash pre-screens; the equality guard makes collisions harmless.
pub fn intern(bytes: &[u8]) -> std::result::Result<Cow<'static, str>, std::str::Utf8Error> {
    let name = std::str::from_utf8(bytes)?;
    let canonical = match fnv1a(bytes) {
        H_PING if name == PING => Some(PING),
        H_DIE if name == DIE => Some(DIE),
        H_REGISTER_CLIENT if name == REGISTER_CLIENT => Some(REGISTER_CLIENT),
        H_UNREGISTER_CLIENT if name == UNREGISTER_CLIENT => Some(UNREGISTER_CLIENT),
        H_DOMAINS if name == DOMAINS => Some(DOMAINS),
        H_TYPES if name == TYPES => Some(TYPES),
        H_TYPE if name == TYPE => Some(TYPE),
        H_HEAP if name == HEAP => Some(HEAP),
        H_OBJECT if name == OBJECT => Some(OBJECT),
        H_CREATE_OBJECT if name == CREATE_OBJECT => Some(CREATE_OBJECT),
        H_INVOKE if name == INVOKE => Some(INVOKE),
        H_GET_FIELD if name == GET_FIELD => Some(GET_FIELD),
        H_SET_FIELD if name == SET_FIELD => Some(SET_FIELD),
        H_GET_ITEM if name == GET_ITEM => Some(GET_ITEM),
        H_UNPIN if name == UNPIN => Some(UNPIN),
        H_EVENT_SUBSCRIBE if name == EVENT_SUBSCRIBE => Some(EVENT_SUBSCRIBE),
        H_EVENT_UNSUBSCRIBE if name == EVENT_UNSUBSCRIBE => Some(EVENT_UNSUBSCRIBE),
        H_HOOK_METHOD if name == HOOK_METHOD => Some(HOOK_METHOD),
        H_UNHOOK_METHOD if name == UNHOOK_METHOD => Some(UNHOOK_METHOD),
        H_INVOKE_CALLBACK if name == INVOKE_CALLBACK => Some(INVOKE_CALLBACK),
        _ => None,
    };
    Ok(match canonical {
        Some(s) => Cow::Borrowed(s),
        None => Cow::Owned(name.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_endpoints_intern_borrowed() {
        for ep in ALL {
            let interned = intern(ep.as_bytes()).expect("utf8");
            assert!(matches!(interned, Cow::Borrowed(_)), "{ep} should intern");
            assert_eq!(interned.as_ref(), *ep);
        }
    }

    #[test]
    fn test_unknown_endpoint_allocates() {
        let interned = intern(b"/no_such_verb").expect("utf8");
        assert!(matches!(interned, Cow::Owned(_)));
        assert_eq!(interned.as_ref(), "/no_such_verb");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(intern(&[0x2f, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_fnv1a_known_vector() {
        // FNV-1a of the empty string is the offset basis.
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_no_hash_collisions_between_known_endpoints() {
        let hashes: Vec<u64> = ALL.iter().map(|e| fnv1a(e.as_bytes())).collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
