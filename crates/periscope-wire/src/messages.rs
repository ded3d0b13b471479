//! Request and response bodies for every protocol endpoint.
//!
//! Each endpoint in [`crate::endpoint`] has a corresponding request
//! struct and either a typed response or a plain [`StatusResponse`]
//! acknowledgement. Responses travel inside
//! [`Envelope`](periscope_types::envelope::Envelope).

use serde::{Deserialize, Serialize};

use periscope_types::value::{InvocationResult, RemoteValue};
use periscope_types::{Address, CallbackToken, HookPosition, MethodTable, Token};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Generic textual acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// `/ping` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

/// `/die` request. Refused while clients remain unless `force` is set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieRequest {
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

/// `/register_client` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub process_id: u32,
}

/// `/unregister_client` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterClientRequest {
    pub process_id: u32,
}

/// `/unregister_client` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterClientResponse {
    pub removed: bool,
    /// Clients still registered after the removal.
    pub remaining: u32,
}

/// `/domains` response: the application domain and its loaded modules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainsResponse {
    pub domain_name: String,
    pub modules: Vec<String>,
}

/// `/types` request: enumerate all types of one assembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypesRequest {
    pub assembly: String,
}

/// `/types` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypesResponse {
    pub assembly: String,
    pub types: Vec<String>,
}

/// `/type` request: resolve one type, optionally scoped to an assembly.
/// The response body is the full `TypeDescriptor`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRequest {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,
}

/// `/heap` request: enumerate live objects, optionally filtered by type.
///
/// The filter compares fully qualified names for exact equality; `*`
/// matches any sequence of characters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dump_hashcodes: bool,
}

/// One live object in a `/heap` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapObject {
    pub address: Address,
    pub method_table: MethodTable,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashcode: Option<i32>,
}

/// `/heap` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapResponse {
    /// Heap generation the walk was taken against.
    pub generation: u64,
    pub objects: Vec<HeapObject>,
}

/// `/object` request: dump an object located by heap address, optionally
/// pinning it. A supplied `hashcode` guards against address recycling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub address: Address,
    pub type_name: String,
    pub pin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashcode: Option<i32>,
}

/// A named member value in an object dump.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: RemoteValue,
}

/// `/object` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDump {
    /// Pin token when `pin` was requested; absent for an unpinned dump.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    pub type_name: String,
    pub fields: Vec<NamedValue>,
    pub properties: Vec<NamedValue>,
    /// Milliseconds since the Unix epoch at dump time.
    pub stamp_ms: u64,
}

/// `/create_object` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    pub type_full_name: String,
    pub parameters: Vec<RemoteValue>,
}

/// `/invoke` request: call a method on a pinned instance (by token) or
/// statically (token 0).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Pin token of the target instance; 0 for static calls.
    pub obj_token: Token,
    pub type_full_name: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_args: Vec<String>,
    pub parameters: Vec<RemoteValue>,
    /// Marshal the call onto the target's synchronisation thread.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_sync_thread: bool,
}

/// `/get_field` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFieldRequest {
    /// Pin token of the target instance; 0 for static fields.
    pub obj_token: Token,
    pub type_full_name: String,
    pub field: String,
}

/// `/set_field` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetFieldRequest {
    pub obj_token: Token,
    pub type_full_name: String,
    pub field: String,
    pub value: RemoteValue,
}

/// `/get_item` request: indexed access into a pinned collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetItemRequest {
    pub collection_token: Token,
    pub index: RemoteValue,
    pub pin: bool,
}

/// `/unpin` request. Idempotent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpinRequest {
    pub token: Token,
}

/// `/event_subscribe` request: subscribe to an event on a pinned object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscribeRequest {
    pub token: Token,
    pub event: String,
}

/// Response carrying a callback registration token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTokenResponse {
    pub token: CallbackToken,
}

/// `/event_unsubscribe` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUnsubscribeRequest {
    pub token: CallbackToken,
}

/// `/hook_method` request: install an interceptor on a target method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMethodRequest {
    pub type_full_name: String,
    pub method: String,
    pub position: HookPosition,
    /// Parameter type names selecting the overload to hook.
    pub parameter_types: Vec<String>,
}

/// `/unhook_method` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhookMethodRequest {
    pub token: CallbackToken,
}

/// `/invoke_callback` body: an unsolicited event or hook notification.
///
/// Travels in a callback frame (id 0), agent to client only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallbackInvocation {
    pub token: CallbackToken,
    /// Milliseconds since the Unix epoch at the moment the event fired.
    pub stamp_ms: u64,
    pub parameters: Vec<RemoteValue>,
}

/// The reply to `/create_object`, `/invoke`, `/get_field`, `/set_field`,
/// and `/get_item` is an [`InvocationResult`]; re-exported here so
/// message consumers need only this module.
pub type InvocationReply = InvocationResult;
