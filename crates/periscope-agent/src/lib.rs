//! # periscope-agent
//!
//! The in-process agent: attaches to a hosted
//! [`RuntimeCore`](periscope_runtime::runtime::RuntimeCore) and serves
//! the Periscope protocol on loopback TCP.
//!
//! - **Pinning table** via [`pin`]: opaque tokens rooting live objects
//! - **Snapshot service** via [`snapshot`]: consistent walks, recovery
//! - **Reflective dispatcher** via [`dispatch`]: overload resolution
//! - **Hook engine** via [`hooks`] and **event bridge** via [`bridge`]
//! - **Request router** via [`router`] and handlers under [`handlers`]
//! - **TCP server** via [`server`], one reader and one batched writer
//!   per connection
//! - **Synchronisation thread** via [`sync`] for apartment-bound calls
//!
//! Lock order is `runtime`, then `pins`, then `snapshots`, then
//! `directory`; locks are never held across await points.

pub mod bridge;
pub mod callbacks;
pub mod config;
pub mod dispatch;
pub mod encode;
pub mod handlers;
pub mod hooks;
pub mod logging;
pub mod pin;
pub mod router;
pub mod server;
pub mod snapshot;
pub mod sync;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};

use periscope_runtime::runtime::RuntimeCore;
use periscope_wire::messages::CallbackInvocation;

use crate::callbacks::{CallbackDirectory, CallbackJob};
use crate::config::AgentConfig;
use crate::pin::PinTable;
use crate::snapshot::SnapshotService;
use crate::sync::SyncThread;

/// Error types for agent server operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] periscope_wire::WireError),
}

/// Shared state behind every handler.
pub struct AgentState {
    pub config: AgentConfig,
    /// The hosted runtime; the single coarse lock for target state.
    pub runtime: Arc<Mutex<RuntimeCore>>,
    pub pins: Mutex<PinTable>,
    pub snapshots: Mutex<SnapshotService>,
    pub directory: Mutex<CallbackDirectory>,
    /// Registered client process ids.
    pub clients: Mutex<HashSet<u32>>,
    /// Fan-out of callback invocations to every live connection.
    pub callback_bus: broadcast::Sender<CallbackInvocation>,
    /// Queue feeding the callback pump; hook and event closures post
    /// here because they run while the runtime lock is held.
    pub callback_jobs: mpsc::UnboundedSender<CallbackJob>,
    pub sync: SyncThread,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AgentState {
    /// Build agent state around a hosted runtime.
    ///
    /// The returned receiver must be passed to
    /// [`callbacks::spawn_pump`]; [`server::AgentServer::run`] does this
    /// for embedders that use it.
    pub fn new(
        config: AgentConfig,
        runtime: Arc<Mutex<RuntimeCore>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CallbackJob>) {
        let (callback_jobs, jobs_rx) = mpsc::unbounded_channel();
        let (callback_bus, _) = broadcast::channel(1024);
        let (shutdown_tx, _) = broadcast::channel(1);
        let policy = config.snapshot_policy();
        let state = Arc::new(Self {
            config,
            runtime,
            pins: Mutex::new(PinTable::new()),
            snapshots: Mutex::new(SnapshotService::new(policy)),
            directory: Mutex::new(CallbackDirectory::new()),
            clients: Mutex::new(HashSet::new()),
            callback_bus,
            callback_jobs,
            sync: SyncThread::spawn(),
            shutdown_tx,
        });
        (state, jobs_rx)
    }
}

/// Poison-tolerant lock: a handler that panicked must not wedge every
/// later request.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
