//! The agent's TCP server.
//!
//! Loopback-only. Each connection gets one reader task and one writer
//! task; requests are handled concurrently on their own tasks, and
//! callback invocations are forwarded to every connection from the
//! agent-wide broadcast bus. The writer drains its bounded channel
//! opportunistically: one awaited frame, then everything immediately
//! available, then a single flush.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use periscope_wire::frame::{Frame, FrameKind, FrameReader};
use periscope_wire::messages::CallbackInvocation;
use periscope_wire::{cbor, endpoint, handshake};

use crate::callbacks::{self, CallbackJob};
use crate::{router, AgentError, AgentState};

/// The listening agent.
pub struct AgentServer {
    state: Arc<AgentState>,
}

impl AgentServer {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }

    /// Bind and advertise without serving yet.
    ///
    /// Binds the configured port, falling back to an ephemeral one when
    /// it is taken; the port file always reflects the bound port.
    pub async fn bind(self) -> Result<BoundServer, AgentError> {
        let pid = std::process::id();
        let preferred = self.state.config.effective_port(pid);

        let listener = match TcpListener::bind(("127.0.0.1", preferred)).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(preferred, %err, "preferred port taken, binding ephemeral");
                TcpListener::bind(("127.0.0.1", 0)).await?
            }
        };
        let local_addr = listener.local_addr()?;
        handshake::advertise(pid, local_addr.port())?;
        info!(%local_addr, pid, "agent listening");

        Ok(BoundServer {
            state: self.state,
            listener,
            local_addr,
        })
    }

    /// Bind, advertise, and serve until shutdown.
    pub async fn run(
        self,
        jobs_rx: mpsc::UnboundedReceiver<CallbackJob>,
    ) -> Result<(), AgentError> {
        self.bind().await?.serve(jobs_rx).await
    }
}

/// A listening agent that has not started accepting yet.
pub struct BoundServer {
    state: Arc<AgentState>,
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown.
    pub async fn serve(
        self,
        jobs_rx: mpsc::UnboundedReceiver<CallbackJob>,
    ) -> Result<(), AgentError> {
        let pump = callbacks::spawn_pump(self.state.clone(), jobs_rx);
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "client connected");
                        let state = self.state.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(state, stream).await {
                                warn!(%err, "connection error");
                            }
                        });
                    }
                    Err(err) => {
                        error!(%err, "accept error");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        handshake::withdraw(std::process::id());
        pump.abort();
        info!("agent stopped");
        Ok(())
    }
}

/// Serve one connection until EOF, error, or agent shutdown.
async fn handle_connection(state: Arc<AgentState>, stream: TcpStream) -> Result<(), AgentError> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(state.config.network.write_channel_capacity);
    let writer = tokio::spawn(periscope_wire::frame::pump_frames(write_half, frame_rx));
    let forwarder = tokio::spawn(forward_callbacks(
        state.callback_bus.subscribe(),
        frame_tx.clone(),
    ));

    let mut reader = FrameReader::new(read_half);
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    loop {
        let frame = tokio::select! {
            next = reader.next() => next,
            _ = shutdown_rx.recv() => break,
        };
        match frame {
            Ok(Some(frame)) if frame.kind == FrameKind::Request => {
                // Requests on one connection are handled concurrently;
                // correlation is by id.
                let state = state.clone();
                let frame_tx = frame_tx.clone();
                tokio::spawn(async move {
                    let body = router::dispatch(&state, &frame.endpoint, &frame.body).await;
                    let response = Frame::response(frame.id, frame.endpoint, body);
                    if frame_tx.send(response).await.is_err() {
                        debug!("connection closed before response could be queued");
                    }
                });
            }
            Ok(Some(frame)) => {
                warn!(kind = ?frame.kind, id = frame.id, "unexpected inbound frame discarded");
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "read error");
                break;
            }
        }
    }

    forwarder.abort();
    drop(frame_tx);
    let _ = writer.await;
    debug!("client disconnected");
    Ok(())
}

/// Forward bus callbacks to this connection as callback frames.
async fn forward_callbacks(
    mut bus: broadcast::Receiver<CallbackInvocation>,
    frame_tx: mpsc::Sender<Frame>,
) {
    loop {
        match bus.recv().await {
            Ok(invocation) => {
                let body = match cbor::to_vec(&invocation) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(%err, "callback failed to serialize");
                        continue;
                    }
                };
                let frame = Frame::callback(endpoint::INVOKE_CALLBACK, body);
                if frame_tx.send(frame).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "connection lagged behind the callback bus");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
