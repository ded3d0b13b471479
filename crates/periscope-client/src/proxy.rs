//! Remote-object proxies.
//!
//! A [`RemoteObject`] stands in for a pinned target object. Handles are
//! reference-counted: cloning increments, dropping decrements, and the
//! last drop schedules an unpin after a jittered delay so a token that
//! is dropped and re-materialised in a burst keeps its pin. Member
//! accesses round-trip over the connection; a released or disconnected
//! proxy rejects them immediately, and [`RemoteObject::is_alive`] gives
//! the exception-free truthiness view.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use rand::Rng;

use periscope_types::descriptor::TypeDescriptor;
use periscope_types::envelope::Fault;
use periscope_types::value::{InvocationResult, RemoteValue, ValuePayload};
use periscope_types::Token;
use periscope_wire::messages::{
    GetFieldRequest, GetItemRequest, InvokeRequest, SetFieldRequest, StatusResponse, UnpinRequest,
};
use periscope_wire::value::{self as wire_value, Primitive};
use periscope_wire::{endpoint, WireError};

use crate::cache::ProxyCache;
use crate::connection::Connection;
use crate::typecache::TypeCache;
use crate::{ClientError, Result};

/// Base delay before an unpin is sent after the last handle drops.
const UNPIN_BASE_SECS: f64 = 1.0;

/// Upper bound on the pre-jitter delay.
const UNPIN_MAX_SECS: f64 = 5.0;

pub use periscope_wire::value::SENTINEL_TYPE;

/// Everything a proxy needs from its owning client.
pub struct ProxyShared {
    pub conn: Connection,
    pub proxies: ProxyCache,
    pub types: TypeCache,
    /// Runtime handle for scheduling unpins from synchronous drops.
    pub runtime: tokio::runtime::Handle,
}

/// Draw the delayed-unpin interval: bounded backoff plus jitter, landing
/// in [800 ms, 6 s].
pub fn jittered_unpin_delay() -> Duration {
    let mut rng = rand::thread_rng();
    let backoff: f64 = UNPIN_BASE_SECS * (1.0 + rng.gen::<f64>());
    let secs = backoff.min(UNPIN_MAX_SECS) * (0.8 + 0.4 * rng.gen::<f64>());
    Duration::from_secs_f64(secs)
}

pub(crate) struct ProxyInner {
    shared: Weak<ProxyShared>,
    token: Token,
    type_name: String,
    /// Connection session the token belongs to; a reconnect invalidates it.
    session: u64,
    descriptor: OnceLock<Arc<TypeDescriptor>>,
    refs: AtomicUsize,
    released: AtomicBool,
    suppress: AtomicBool,
}

impl ProxyInner {
    pub(crate) fn new(shared: &Arc<ProxyShared>, token: Token, type_name: &str) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            token,
            type_name: type_name.to_string(),
            session: shared.conn.session(),
            descriptor: OnceLock::new(),
            refs: AtomicUsize::new(1),
            released: AtomicBool::new(false),
            suppress: AtomicBool::new(false),
        }
    }

    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn add_reference(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.released.store(false, Ordering::Release);
    }

    /// Mark this proxy as discarded in a cache race; its pending or
    /// future unpin must not fire.
    pub(crate) fn suppress_unpin(&self) {
        self.suppress.store(true, Ordering::Release);
    }
}

/// A ref-counted stand-in for a pinned target object.
pub struct RemoteObject {
    inner: Arc<ProxyInner>,
}

impl Clone for RemoteObject {
    fn clone(&self) -> Self {
        self.inner.add_reference();
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if self.inner.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // Last handle gone.
        self.inner.released.store(true, Ordering::Release);
        if self.inner.suppress.load(Ordering::Acquire) {
            return;
        }
        let Some(shared) = self.inner.shared.upgrade() else {
            return;
        };
        if !shared.conn.is_alive() || shared.conn.session() != self.inner.session {
            return;
        }

        let token = self.inner.token;
        let delay = jittered_unpin_delay();
        let session = self.inner.session;
        let runtime = shared.runtime.clone();
        let _ = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // The token may have been re-materialised during the delay,
            // or the connection replaced; either suppresses the unpin.
            if shared.proxies.has_live(token) {
                return;
            }
            if !shared.conn.is_alive() || shared.conn.session() != session {
                return;
            }
            let outcome = shared
                .conn
                .call::<_, StatusResponse>(endpoint::UNPIN, &UnpinRequest { token })
                .await;
            if let Err(err) = outcome {
                tracing::debug!(token, %err, "delayed unpin failed");
            }
        });
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("token", &self.inner.token)
            .field("type_name", &self.inner.type_name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl RemoteObject {
    /// Wrap an inner proxy whose reference count already includes this
    /// handle.
    pub(crate) fn adopt(inner: Arc<ProxyInner>) -> Self {
        Self { inner }
    }

    pub fn token(&self) -> Token {
        self.inner.token
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// The truthiness protocol: false for a released or disconnected
    /// proxy, without raising.
    pub fn is_alive(&self) -> bool {
        if self.inner.released.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.shared.upgrade() {
            Some(shared) => {
                shared.conn.is_alive() && shared.conn.session() == self.inner.session
            }
            None => false,
        }
    }

    fn shared(&self) -> Result<Arc<ProxyShared>> {
        let shared = self.inner.shared.upgrade().ok_or(ClientError::Disposed)?;
        if !shared.conn.is_alive() || shared.conn.session() != self.inner.session {
            return Err(ClientError::Disposed);
        }
        Ok(shared)
    }

    /// The type descriptor, fetched lazily on first use.
    pub async fn descriptor(&self) -> Result<Arc<TypeDescriptor>> {
        if let Some(descriptor) = self.inner.descriptor.get() {
            return Ok(descriptor.clone());
        }
        let shared = self.shared()?;
        let descriptor = shared
            .types
            .get_or_fetch(&shared.conn, &self.inner.type_name, None)
            .await?;
        let _ = self.inner.descriptor.set(descriptor.clone());
        Ok(descriptor)
    }

    /// Read a field.
    pub async fn get_field(&self, field: &str) -> Result<ClientValue> {
        let shared = self.shared()?;
        let result: InvocationResult = shared
            .conn
            .call(
                endpoint::GET_FIELD,
                &GetFieldRequest {
                    obj_token: self.inner.token,
                    type_full_name: self.inner.type_name.clone(),
                    field: field.to_string(),
                },
            )
            .await?;
        ClientValue::from_result(&shared, result)?
            .ok_or_else(|| ClientError::Codec("field read returned void".to_string()))
    }

    /// Write a field.
    pub async fn set_field(&self, field: &str, value: impl Into<CallArg>) -> Result<()> {
        let shared = self.shared()?;
        let _: InvocationResult = shared
            .conn
            .call(
                endpoint::SET_FIELD,
                &SetFieldRequest {
                    obj_token: self.inner.token,
                    type_full_name: self.inner.type_name.clone(),
                    field: field.to_string(),
                    value: value.into().into_remote(),
                },
            )
            .await?;
        Ok(())
    }

    /// Invoke a method; `None` for void returns.
    pub async fn invoke(
        &self,
        method: &str,
        args: impl IntoIterator<Item = CallArg>,
    ) -> Result<Option<ClientValue>> {
        self.invoke_generic(method, Vec::new(), args).await
    }

    /// Invoke a generic method specialised by `generic_args`.
    pub async fn invoke_generic(
        &self,
        method: &str,
        generic_args: Vec<String>,
        args: impl IntoIterator<Item = CallArg>,
    ) -> Result<Option<ClientValue>> {
        let shared = self.shared()?;
        let force_sync_thread = crate::client::sync_scope_active();
        let result: InvocationResult = shared
            .conn
            .call(
                endpoint::INVOKE,
                &InvokeRequest {
                    obj_token: self.inner.token,
                    type_full_name: self.inner.type_name.clone(),
                    method: method.to_string(),
                    generic_args,
                    parameters: args.into_iter().map(CallArg::into_remote).collect(),
                    force_sync_thread,
                },
            )
            .await?;
        ClientValue::from_result(&shared, result)
    }

    /// Read a property through its `get` accessor, searching base types.
    pub async fn get_property(&self, property: &str) -> Result<ClientValue> {
        let getter = self.property_accessor(property, AccessorKind::Get).await?;
        self.invoke(&getter, [])
            .await?
            .ok_or_else(|| ClientError::Codec("property getter returned void".to_string()))
    }

    /// Write a property through its `set` accessor.
    pub async fn set_property(&self, property: &str, value: impl Into<CallArg>) -> Result<()> {
        let setter = self.property_accessor(property, AccessorKind::Set).await?;
        self.invoke(&setter, [value.into()]).await?;
        Ok(())
    }

    async fn property_accessor(&self, property: &str, kind: AccessorKind) -> Result<String> {
        let shared = self.shared()?;
        let mut descriptor = self.descriptor().await?;
        loop {
            if let Some(found) = descriptor.property(property) {
                let accessor = match kind {
                    AccessorKind::Get => found.getter.as_ref(),
                    AccessorKind::Set => found.setter.as_ref(),
                };
                return accessor.cloned().ok_or_else(|| {
                    ClientError::Agent(Fault::Resolution(format!(
                        "property '{property}' on '{}' has no {} accessor",
                        descriptor.full_name,
                        kind.as_str()
                    )))
                });
            }
            let not_found = || {
                ClientError::Agent(Fault::Resolution(format!(
                    "property '{property}' not found on '{}' or its bases",
                    self.inner.type_name
                )))
            };
            let Some(base) = descriptor.base_type.clone() else {
                return Err(not_found());
            };
            descriptor = match shared.types.get_or_fetch(&shared.conn, &base, None).await {
                Ok(descriptor) => descriptor,
                // An unloadable base (e.g. the object root) ends the walk.
                Err(ClientError::Agent(Fault::Resolution(_))) => return Err(not_found()),
                Err(other) => return Err(other),
            };
        }
    }

    /// Indexed access through the target's indexer.
    pub async fn get_item(&self, index: impl Into<CallArg>) -> Result<ClientValue> {
        let shared = self.shared()?;
        let result: InvocationResult = shared
            .conn
            .call(
                endpoint::GET_ITEM,
                &GetItemRequest {
                    collection_token: self.inner.token,
                    index: index.into().into_remote(),
                    pin: true,
                },
            )
            .await?;
        ClientValue::from_result(&shared, result)?
            .ok_or_else(|| ClientError::Codec("indexer returned void".to_string()))
    }

    /// Iterate using the target's own enumerator object.
    pub async fn enumerate(&self) -> Result<RemoteEnumerator> {
        let enumerator = self
            .invoke("GetEnumerator", [])
            .await?
            .and_then(ClientValue::into_object)
            .ok_or_else(|| {
                ClientError::Agent(Fault::Resolution(format!(
                    "'{}' has no usable GetEnumerator",
                    self.inner.type_name
                )))
            })?;
        Ok(RemoteEnumerator { enumerator })
    }
}

enum AccessorKind {
    Get,
    Set,
}

impl AccessorKind {
    fn as_str(&self) -> &'static str {
        match self {
            AccessorKind::Get => "get",
            AccessorKind::Set => "set",
        }
    }
}

/// Wrapper proxying the target's `IEnumerator` surface.
pub struct RemoteEnumerator {
    enumerator: RemoteObject,
}

impl RemoteEnumerator {
    /// Advance; `Some(current)` until the target reports exhaustion.
    pub async fn next(&mut self) -> Result<Option<ClientValue>> {
        let moved = self
            .enumerator
            .invoke("MoveNext", [])
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !moved {
            return Ok(None);
        }
        self.enumerator.get_property("Current").await.map(Some)
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.enumerator.invoke("Reset", []).await?;
        Ok(())
    }

    /// Dispose the target enumerator; missing `Dispose` is tolerated.
    pub async fn dispose(self) -> Result<()> {
        match self.enumerator.invoke("Dispose", []).await {
            Ok(_) => Ok(()),
            Err(ClientError::Agent(Fault::Resolution(_))) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A value as seen by client code.
#[derive(Debug)]
pub enum ClientValue {
    Null,
    Primitive(Primitive),
    Enum { enum_type: String, member: String },
    Object(RemoteObject),
    Type {
        assembly: Option<String>,
        full_name: String,
    },
    /// A non-proxyable by-ref argument; any attempt to read it is a bug
    /// in the caller.
    Sentinel,
}

impl ClientValue {
    /// Materialise one wire value, creating proxies for pinned tokens.
    pub(crate) fn from_remote(shared: &Arc<ProxyShared>, value: RemoteValue) -> Result<Self> {
        match value.payload {
            ValuePayload::Null => Ok(ClientValue::Null),
            ValuePayload::Pinned { token, type_name } => Ok(ClientValue::Object(
                shared.proxies.materialise(shared, token, &type_name),
            )),
            ValuePayload::TypeHandle {
                assembly,
                full_name,
            } => Ok(ClientValue::Type {
                assembly,
                full_name,
            }),
            ValuePayload::Encoded { type_name, text } => {
                if type_name == SENTINEL_TYPE {
                    return Ok(ClientValue::Sentinel);
                }
                match wire_value::decode(&type_name, &text) {
                    Ok(primitive) => Ok(ClientValue::Primitive(primitive)),
                    // An unknown encoded type is a remote enum member.
                    Err(WireError::UnknownPrimitive(_)) => Ok(ClientValue::Enum {
                        enum_type: type_name,
                        member: text,
                    }),
                    Err(err) => Err(ClientError::Codec(err.to_string())),
                }
            }
        }
    }

    pub(crate) fn from_result(
        shared: &Arc<ProxyShared>,
        result: InvocationResult,
    ) -> Result<Option<Self>> {
        match result {
            InvocationResult::Void => Ok(None),
            InvocationResult::Value { returned } => Self::from_remote(shared, returned).map(Some),
        }
    }

    pub fn into_object(self) -> Option<RemoteObject> {
        match self {
            ClientValue::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ClientValue::Primitive(Primitive::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ClientValue::Primitive(primitive) => match primitive {
                Primitive::I8(v) => Some(i64::from(*v)),
                Primitive::I16(v) => Some(i64::from(*v)),
                Primitive::I32(v) => Some(i64::from(*v)),
                Primitive::I64(v) => Some(*v),
                Primitive::U8(v) => Some(i64::from(*v)),
                Primitive::U16(v) => Some(i64::from(*v)),
                Primitive::U32(v) => Some(i64::from(*v)),
                Primitive::U64(v) => i64::try_from(*v).ok(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClientValue::Primitive(Primitive::Str(value)) => Some(value),
            _ => None,
        }
    }
}

/// An argument for a remote call.
#[derive(Clone, Debug)]
pub enum CallArg {
    Null,
    Primitive(Primitive),
    Enum { enum_type: String, member: String },
    Object(RemoteObject),
    Type {
        assembly: Option<String>,
        full_name: String,
    },
}

impl CallArg {
    pub(crate) fn into_remote(self) -> RemoteValue {
        let stamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        match self {
            CallArg::Null => RemoteValue::null(stamp_ms),
            CallArg::Primitive(primitive) => primitive.to_remote(stamp_ms),
            // Enum arguments travel as a reference to the remote enum
            // member rather than a local numeric guess.
            CallArg::Enum { enum_type, member } => {
                RemoteValue::encoded(stamp_ms, enum_type, member)
            }
            CallArg::Object(object) => {
                RemoteValue::pinned(stamp_ms, object.token(), object.type_name())
            }
            CallArg::Type {
                assembly,
                full_name,
            } => RemoteValue::type_handle(stamp_ms, assembly, full_name),
        }
    }

    pub fn enum_member(enum_type: impl Into<String>, member: impl Into<String>) -> Self {
        CallArg::Enum {
            enum_type: enum_type.into(),
            member: member.into(),
        }
    }

    pub fn type_handle(full_name: impl Into<String>) -> Self {
        CallArg::Type {
            assembly: None,
            full_name: full_name.into(),
        }
    }
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        CallArg::Primitive(Primitive::Bool(value))
    }
}

impl From<i32> for CallArg {
    fn from(value: i32) -> Self {
        CallArg::Primitive(Primitive::I32(value))
    }
}

impl From<i64> for CallArg {
    fn from(value: i64) -> Self {
        CallArg::Primitive(Primitive::I64(value))
    }
}

impl From<f64> for CallArg {
    fn from(value: f64) -> Self {
        CallArg::Primitive(Primitive::F64(value))
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        CallArg::Primitive(Primitive::Str(value.to_string()))
    }
}

impl From<String> for CallArg {
    fn from(value: String) -> Self {
        CallArg::Primitive(Primitive::Str(value))
    }
}

impl From<&RemoteObject> for CallArg {
    fn from(value: &RemoteObject) -> Self {
        CallArg::Object(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jittered_delay_bounds() {
        for _ in 0..1000 {
            let delay = jittered_unpin_delay();
            assert!(delay >= Duration::from_millis(800), "delay {delay:?} too short");
            assert!(delay <= Duration::from_secs(6), "delay {delay:?} too long");
        }
    }

    #[test]
    fn test_call_arg_conversions() {
        assert!(matches!(
            CallArg::from(42i32),
            CallArg::Primitive(Primitive::I32(42))
        ));
        assert!(matches!(
            CallArg::from("hi"),
            CallArg::Primitive(Primitive::Str(_))
        ));
        let arg = CallArg::enum_member("Demo.Color", "Red");
        match arg.into_remote().payload {
            ValuePayload::Encoded { type_name, text } => {
                assert_eq!(type_name, "Demo.Color");
                assert_eq!(text, "Red");
            }
            other => unreachable!("encoded expected, got {other:?}"),
        }
    }
}
