//! The client facade and the process-wide instance.
//!
//! A [`Client`] owns one connection to one agent plus the proxy and
//! type caches. The process-wide instance mirrors the common embedding:
//! one connection per target, initialised idempotently and re-usable
//! after disposal.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use periscope_types::descriptor::TypeDescriptor;
use periscope_types::envelope::Fault;
use periscope_types::value::InvocationResult;
use periscope_types::{CallbackToken, HookPosition};
use periscope_wire::endpoint;
use periscope_wire::handshake;
use periscope_wire::messages::{
    CallbackTokenResponse, CreateObjectRequest, DieRequest, DomainsResponse,
    EventSubscribeRequest, EventUnsubscribeRequest, HeapRequest, HeapResponse, HookMethodRequest,
    InvokeRequest, ObjectDump, ObjectRequest, PingResponse, RegisterClientRequest, StatusResponse,
    TypesRequest, TypesResponse, UnhookMethodRequest, UnregisterClientRequest,
};

use crate::bootstrap::{Bootstrapper, FileHandshake};
use crate::cache::ProxyCache;
use crate::connection::Connection;
use crate::proxy::{CallArg, ClientValue, ProxyShared, RemoteObject};
use crate::typecache::TypeCache;
use crate::{ClientError, Result};

tokio::task_local! {
    static FORCE_SYNC_THREAD: bool;
}

/// True inside a [`with_sync_thread`] scope.
pub(crate) fn sync_scope_active() -> bool {
    FORCE_SYNC_THREAD.try_with(|flag| *flag).unwrap_or(false)
}

/// Run `future` with every request it issues marshalled onto the
/// target's synchronisation thread.
pub async fn with_sync_thread<F: std::future::Future>(future: F) -> F::Output {
    FORCE_SYNC_THREAD.scope(true, future).await
}

/// A handler for event and hook callbacks: `(event stamp, parameters)`.
pub type EventHandlerFn = dyn Fn(u64, Vec<ClientValue>) + Send + Sync;

/// An active event subscription; drop it without unsubscribing and the
/// registration lives until the connection closes.
pub struct EventSubscription {
    token: CallbackToken,
    client: Client,
}

impl EventSubscription {
    pub fn token(&self) -> CallbackToken {
        self.token
    }

    pub async fn unsubscribe(self) -> Result<()> {
        self.client.conn().listener().unregister(self.token);
        let _: StatusResponse = self
            .client
            .conn()
            .call(
                endpoint::EVENT_UNSUBSCRIBE,
                &EventUnsubscribeRequest { token: self.token },
            )
            .await?;
        Ok(())
    }
}

/// An installed method hook.
pub struct MethodHook {
    token: CallbackToken,
    client: Client,
}

impl std::fmt::Debug for MethodHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHook")
            .field("token", &self.token)
            .finish()
    }
}

impl MethodHook {
    pub fn token(&self) -> CallbackToken {
        self.token
    }

    pub async fn unhook(self) -> Result<()> {
        self.client.conn().listener().unregister(self.token);
        let _: StatusResponse = self
            .client
            .conn()
            .call(
                endpoint::UNHOOK_METHOD,
                &UnhookMethodRequest { token: self.token },
            )
            .await?;
        Ok(())
    }
}

/// A connected Periscope client.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ProxyShared>,
}

impl Client {
    /// Connect to an agent on a loopback port and register this process.
    pub async fn connect(port: u16) -> Result<Self> {
        let conn = Connection::connect(port).await?;
        let shared = Arc::new(ProxyShared {
            conn,
            proxies: ProxyCache::new(),
            types: TypeCache::new(),
            runtime: tokio::runtime::Handle::current(),
        });
        let client = Self { shared };
        let _: StatusResponse = client
            .conn()
            .call(
                endpoint::REGISTER_CLIENT,
                &RegisterClientRequest {
                    process_id: std::process::id(),
                },
            )
            .await?;
        debug!(port, "client connected and registered");
        Ok(client)
    }

    /// Attach to the agent advertised for `pid`.
    pub async fn attach(pid: u32) -> Result<Self> {
        let port = FileHandshake
            .query_status(pid)
            .await?
            .ok_or_else(|| ClientError::NoAgent(format!("no live agent for process {pid}")))?;
        Self::connect(port).await
    }

    /// Attach to the first live agent on this machine.
    pub async fn discover() -> Result<Self> {
        for (pid, port) in handshake::discover() {
            if crate::bootstrap::ping_agent(port).await {
                debug!(pid, port, "discovered live agent");
                return Self::connect(port).await;
            }
            handshake::withdraw(pid);
        }
        Err(ClientError::NoAgent(
            "no advertised agent answered".to_string(),
        ))
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.shared.conn
    }

    pub fn is_alive(&self) -> bool {
        self.shared.conn.is_alive()
    }

    pub async fn ping(&self) -> Result<()> {
        let response: PingResponse = self.conn().call_empty(endpoint::PING).await?;
        if response.status == "pong" {
            Ok(())
        } else {
            Err(ClientError::Transport(format!(
                "unexpected ping status '{}'",
                response.status
            )))
        }
    }

    pub async fn domains(&self) -> Result<DomainsResponse> {
        self.conn().call_empty(endpoint::DOMAINS).await
    }

    pub async fn types_in(&self, assembly: &str) -> Result<Vec<String>> {
        let response: TypesResponse = self
            .conn()
            .call(
                endpoint::TYPES,
                &TypesRequest {
                    assembly: assembly.to_string(),
                },
            )
            .await?;
        Ok(response.types)
    }

    /// Resolve a type descriptor, cached after the first fetch.
    pub async fn get_type(&self, full_name: &str) -> Result<Arc<TypeDescriptor>> {
        self.shared
            .types
            .get_or_fetch(self.conn(), full_name, None)
            .await
    }

    /// Walk the target heap.
    pub async fn heap(&self, type_filter: Option<&str>, dump_hashcodes: bool) -> Result<HeapResponse> {
        self.conn()
            .call(
                endpoint::HEAP,
                &HeapRequest {
                    type_filter: type_filter.map(str::to_string),
                    dump_hashcodes,
                },
            )
            .await
    }

    /// Dump the object at a heap address without pinning it.
    pub async fn dump_object(&self, address: u64, type_name: &str) -> Result<ObjectDump> {
        self.conn()
            .call(
                endpoint::OBJECT,
                &ObjectRequest {
                    address,
                    type_name: type_name.to_string(),
                    pin: false,
                    hashcode: None,
                },
            )
            .await
    }

    /// Pin the object at a heap address and materialise its proxy. The
    /// optional hash code guards against the address having been
    /// recycled by another object.
    pub async fn object_at(
        &self,
        address: u64,
        type_name: &str,
        hashcode: Option<i32>,
    ) -> Result<RemoteObject> {
        let dump: ObjectDump = self
            .conn()
            .call(
                endpoint::OBJECT,
                &ObjectRequest {
                    address,
                    type_name: type_name.to_string(),
                    pin: true,
                    hashcode,
                },
            )
            .await?;
        let token = dump.token.ok_or_else(|| {
            ClientError::Codec("pin requested but no token returned".to_string())
        })?;
        Ok(self
            .shared
            .proxies
            .materialise(&self.shared, token, &dump.type_name))
    }

    /// Construct a new object in the target.
    pub async fn create(
        &self,
        type_full_name: &str,
        args: impl IntoIterator<Item = CallArg>,
    ) -> Result<RemoteObject> {
        let result: InvocationResult = self
            .conn()
            .call(
                endpoint::CREATE_OBJECT,
                &CreateObjectRequest {
                    type_full_name: type_full_name.to_string(),
                    parameters: args.into_iter().map(CallArg::into_remote).collect(),
                },
            )
            .await?;
        ClientValue::from_result(&self.shared, result)?
            .and_then(ClientValue::into_object)
            .ok_or_else(|| ClientError::Codec("constructor returned no object".to_string()))
    }

    /// Invoke a static method on a target type.
    pub async fn invoke_static(
        &self,
        type_full_name: &str,
        method: &str,
        args: impl IntoIterator<Item = CallArg>,
    ) -> Result<Option<ClientValue>> {
        let result: InvocationResult = self
            .conn()
            .call(
                endpoint::INVOKE,
                &InvokeRequest {
                    obj_token: periscope_types::NULL_TOKEN,
                    type_full_name: type_full_name.to_string(),
                    method: method.to_string(),
                    generic_args: Vec::new(),
                    parameters: args.into_iter().map(CallArg::into_remote).collect(),
                    force_sync_thread: sync_scope_active(),
                },
            )
            .await?;
        ClientValue::from_result(&self.shared, result)
    }

    /// Subscribe to an event on a pinned object.
    pub async fn subscribe(
        &self,
        target: &RemoteObject,
        event: &str,
        handler: impl Fn(u64, Vec<ClientValue>) + Send + Sync + 'static,
    ) -> Result<EventSubscription> {
        let response: CallbackTokenResponse = self
            .conn()
            .call(
                endpoint::EVENT_SUBSCRIBE,
                &EventSubscribeRequest {
                    token: target.token(),
                    event: event.to_string(),
                },
            )
            .await?;

        self.register_handler(response.token, handler);
        Ok(EventSubscription {
            token: response.token,
            client: self.clone(),
        })
    }

    /// Hook a target method at a position, selecting the overload by its
    /// exact parameter type list.
    pub async fn hook(
        &self,
        type_full_name: &str,
        method: &str,
        parameter_types: Vec<String>,
        position: HookPosition,
        handler: impl Fn(u64, Vec<ClientValue>) + Send + Sync + 'static,
    ) -> Result<MethodHook> {
        let response: CallbackTokenResponse = self
            .conn()
            .call(
                endpoint::HOOK_METHOD,
                &HookMethodRequest {
                    type_full_name: type_full_name.to_string(),
                    method: method.to_string(),
                    position,
                    parameter_types,
                },
            )
            .await?;

        self.register_handler(response.token, handler);
        Ok(MethodHook {
            token: response.token,
            client: self.clone(),
        })
    }

    fn register_handler(
        &self,
        token: CallbackToken,
        handler: impl Fn(u64, Vec<ClientValue>) + Send + Sync + 'static,
    ) {
        let shared = self.shared.clone();
        self.conn().listener().register(
            token,
            Arc::new(move |invocation| {
                let mut values = Vec::with_capacity(invocation.parameters.len());
                for parameter in invocation.parameters {
                    match ClientValue::from_remote(&shared, parameter) {
                        Ok(value) => values.push(value),
                        Err(err) => {
                            tracing::warn!(token, %err, "callback parameter dropped");
                            return;
                        }
                    }
                }
                handler(invocation.stamp_ms, values);
            }),
        );
    }

    /// Read a static field (or enum member) of a target type.
    pub async fn get_static_field(
        &self,
        type_full_name: &str,
        field: &str,
    ) -> Result<ClientValue> {
        let result: InvocationResult = self
            .conn()
            .call(
                endpoint::GET_FIELD,
                &periscope_wire::messages::GetFieldRequest {
                    obj_token: periscope_types::NULL_TOKEN,
                    type_full_name: type_full_name.to_string(),
                    field: field.to_string(),
                },
            )
            .await?;
        ClientValue::from_result(&self.shared, result)?
            .ok_or_else(|| ClientError::Codec("field read returned void".to_string()))
    }

    /// Explicitly release a pin, bypassing the proxy lifecycle.
    /// Idempotent at the agent.
    pub async fn unpin(&self, token: periscope_types::Token) -> Result<()> {
        let _: StatusResponse = self
            .conn()
            .call(
                endpoint::UNPIN,
                &periscope_wire::messages::UnpinRequest { token },
            )
            .await?;
        Ok(())
    }

    /// Ask the agent to shut down.
    pub async fn die(&self, force: bool) -> Result<()> {
        match self
            .conn()
            .call::<_, StatusResponse>(endpoint::DIE, &DieRequest { force })
            .await
        {
            Ok(_) => Ok(()),
            Err(ClientError::Agent(Fault::State(message))) => {
                Err(ClientError::Agent(Fault::State(message)))
            }
            // The agent may drop the connection mid-acknowledgement.
            Err(ClientError::Cancelled(_) | ClientError::Transport(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Unregister and tear the connection down; pending requests fail
    /// with a cancellation.
    pub async fn dispose(&self) {
        if self.is_alive() {
            let _ = self
                .conn()
                .call::<_, periscope_wire::messages::UnregisterClientResponse>(
                    endpoint::UNREGISTER_CLIENT,
                    &UnregisterClientRequest {
                        process_id: std::process::id(),
                    },
                )
                .await;
        }
        self.conn().close();
    }
}

static GLOBAL: OnceLock<tokio::sync::Mutex<Option<Client>>> = OnceLock::new();

fn global_slot() -> &'static tokio::sync::Mutex<Option<Client>> {
    GLOBAL.get_or_init(|| tokio::sync::Mutex::new(None))
}

/// Connect the process-wide client, idempotently: concurrent and
/// repeated callers share one connection, and a disposed instance is
/// replaced on the next call.
pub async fn connect_global(port: u16) -> Result<Client> {
    let mut slot = global_slot().lock().await;
    if let Some(existing) = slot.as_ref() {
        if existing.is_alive() {
            return Ok(existing.clone());
        }
    }
    let client = Client::connect(port).await?;
    *slot = Some(client.clone());
    Ok(client)
}

/// The process-wide client, when connected.
pub async fn global() -> Option<Client> {
    global_slot().lock().await.as_ref().cloned()
}

/// Dispose the process-wide client. Safe to call repeatedly; the next
/// [`connect_global`] re-initialises.
pub async fn dispose_global() {
    let taken = {
        let mut slot = global_slot().lock().await;
        slot.take()
    };
    if let Some(client) = taken {
        client.dispose().await;
    }
}
