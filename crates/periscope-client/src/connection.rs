//! The multiplexed connection.
//!
//! One reader task parses inbound frames: responses complete their
//! pending request future by id, callbacks go to the listener, and a
//! late response whose request already timed out is logged and dropped.
//! One writer task drains a bounded channel with opportunistic batching.
//! Requests issued concurrently may complete out of order; correlation
//! is by id only.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use periscope_types::envelope::Envelope;
use periscope_wire::frame::{Frame, FrameKind, FrameReader};
use periscope_wire::messages::CallbackInvocation;
use periscope_wire::{cbor, endpoint};

use crate::listener::CallbackListener;
use crate::{ClientError, Result};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle interval after which the connection pings the agent.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded write-channel capacity; waits on full for back-pressure.
const WRITE_CHANNEL_CAPACITY: usize = 500;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

type PendingMap = Mutex<HashMap<u32, oneshot::Sender<Result<Vec<u8>>>>>;

struct ConnInner {
    frame_tx: mpsc::Sender<Frame>,
    pending: PendingMap,
    next_id: AtomicU32,
    listener: CallbackListener,
    alive: AtomicBool,
    last_activity_ms: AtomicU64,
    request_timeout: Duration,
    session: u64,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ConnInner {
    fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn cancel_all_pending(&self, reason: &str) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ClientError::Cancelled(reason.to_string())));
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A live agent connection; clones share the underlying channel.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Connect to an agent on loopback.
    pub async fn connect(port: u16) -> Result<Self> {
        Self::connect_addr(SocketAddr::from(([127, 0, 0, 1], port))).await
    }

    pub async fn connect_addr(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Transport(format!("connect to {addr} failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (frame_tx, frame_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        let inner = Arc::new(ConnInner {
            frame_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            listener: CallbackListener::new(),
            alive: AtomicBool::new(true),
            last_activity_ms: AtomicU64::new(now_ms()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(periscope_wire::frame::pump_frames(write_half, frame_rx));
        let reader = tokio::spawn(read_loop(inner.clone(), read_half));
        let keepalive = tokio::spawn(keepalive_loop(inner.clone(), DEFAULT_IDLE_INTERVAL));
        {
            let mut tasks = inner
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            tasks.push(writer);
            tasks.push(reader);
            tasks.push(keepalive);
        }

        debug!(%addr, session = inner.session, "connected to agent");
        Ok(Self { inner })
    }

    /// Issue one request and await its raw response body.
    pub async fn request(
        &self,
        endpoint_name: impl Into<Cow<'static, str>>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if !self.is_alive() {
            return Err(ClientError::Transport("connection is closed".to_string()));
        }

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending.insert(id, tx);
        }

        let frame = Frame::request(id, endpoint_name, body);
        if self.inner.frame_tx.send(frame).await.is_err() {
            self.forget(id);
            return Err(ClientError::Transport("write channel closed".to_string()));
        }
        self.inner.touch();

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Cancelled("connection closed".to_string())),
            Err(_) => {
                // Detach our expectation; the reader tolerates the late
                // response by discarding it.
                self.forget(id);
                Err(ClientError::Timeout(self.inner.request_timeout))
            }
        }
    }

    /// Typed request: CBOR body out, enveloped CBOR body back.
    pub async fn call<Req, Resp>(
        &self,
        endpoint_name: impl Into<Cow<'static, str>>,
        request: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = cbor::to_vec(request).map_err(|e| ClientError::Codec(e.to_string()))?;
        let bytes = self.request(endpoint_name, body).await?;
        let envelope: Envelope<Resp> =
            cbor::from_slice(&bytes).map_err(|e| ClientError::Codec(e.to_string()))?;
        envelope.into_result().map_err(ClientError::Agent)
    }

    /// Typed request with an empty body.
    pub async fn call_empty<Resp: DeserializeOwned>(
        &self,
        endpoint_name: impl Into<Cow<'static, str>>,
    ) -> Result<Resp> {
        let bytes = self.request(endpoint_name, Vec::new()).await?;
        let envelope: Envelope<Resp> =
            cbor::from_slice(&bytes).map_err(|e| ClientError::Codec(e.to_string()))?;
        envelope.into_result().map_err(ClientError::Agent)
    }

    pub fn listener(&self) -> &CallbackListener {
        &self.inner.listener
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Relaxed)
    }

    /// Session number distinguishing this connection from any later
    /// reconnect; proxy caches compare it before reusing tokens.
    pub fn session(&self) -> u64 {
        self.inner.session
    }

    /// Tear the connection down; all pending requests complete as
    /// cancelled.
    pub fn close(&self) {
        if !self.inner.alive.swap(false, Ordering::Relaxed) {
            return;
        }
        self.inner.cancel_all_pending("connection closed locally");
        self.inner.listener.clear();
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!(session = self.inner.session, "connection closed");
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            // Id 0 is reserved for callbacks; skip it on wrap.
            if id != 0 {
                return id;
            }
        }
    }

    fn forget(&self, id: u32) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pending.remove(&id);
    }
}

async fn read_loop(inner: Arc<ConnInner>, read_half: OwnedReadHalf) {
    let mut reader = FrameReader::new(read_half);
    loop {
        match reader.next().await {
            Ok(Some(frame)) => {
                inner.touch();
                match frame.kind {
                    FrameKind::Response => {
                        let waiter = {
                            let mut pending = inner
                                .pending
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            pending.remove(&frame.id)
                        };
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Ok(frame.body));
                            }
                            None => {
                                debug!(id = frame.id, "late response discarded");
                            }
                        }
                    }
                    FrameKind::Callback => match cbor::from_slice::<CallbackInvocation>(&frame.body)
                    {
                        Ok(invocation) => inner.listener.dispatch(invocation),
                        Err(err) => warn!(%err, "malformed callback frame"),
                    },
                    FrameKind::Request => {
                        warn!(id = frame.id, "agent sent a request frame; discarded");
                    }
                }
            }
            Ok(None) => {
                debug!("agent closed the connection");
                break;
            }
            Err(err) => {
                warn!(%err, "read error");
                break;
            }
        }
    }
    inner.alive.store(false, Ordering::Relaxed);
    inner.cancel_all_pending("connection lost");
}

/// Ping the agent when the connection has been idle for a full interval.
async fn keepalive_loop(inner: Arc<ConnInner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if !inner.alive.load(Ordering::Relaxed) {
            return;
        }
        let idle_ms = now_ms().saturating_sub(inner.last_activity_ms.load(Ordering::Relaxed));
        if idle_ms < interval.as_millis() as u64 {
            continue;
        }
        let connection = Connection {
            inner: inner.clone(),
        };
        if connection.request(endpoint::PING, Vec::new()).await.is_err() {
            debug!("keepalive ping failed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_wire::messages::PingResponse;
    use tokio::net::TcpListener;

    /// A hand-rolled agent speaking raw frames, for transport tests.
    async fn fake_agent(behaviour: fn(Vec<Frame>) -> Vec<Frame>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half);
            let mut batch = Vec::new();
            while let Ok(Some(frame)) = reader.next().await {
                batch.push(frame);
                if batch.len() == 2 {
                    for response in behaviour(std::mem::take(&mut batch)) {
                        periscope_wire::frame::write_frame(&mut write_half, &response)
                            .await
                            .expect("write");
                    }
                }
            }
        });
        addr
    }

    fn pong_body() -> Vec<u8> {
        cbor::to_vec(&Envelope::ok(PingResponse {
            status: "pong".to_string(),
        }))
        .expect("serialize")
    }

    #[tokio::test]
    async fn test_out_of_order_responses_correlate_by_id() {
        // Replies to two requests arrive in reverse order.
        let addr = fake_agent(|requests| {
            let mut responses: Vec<Frame> = requests
                .into_iter()
                .map(|request| Frame::response(request.id, request.endpoint, pong_body()))
                .collect();
            responses.reverse();
            responses
        })
        .await;

        let conn = Connection::connect_addr(addr).await.expect("connect");
        let first = conn.call_empty::<PingResponse>(endpoint::PING);
        let second = conn.call_empty::<PingResponse>(endpoint::PING);
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.expect("first").status, "pong");
        assert_eq!(second.expect("second").status, "pong");
        conn.close();
    }

    #[tokio::test]
    async fn test_callbacks_route_to_listener() {
        use std::sync::atomic::AtomicU64;

        // Each request pair triggers one callback plus the responses.
        let addr = fake_agent(|requests| {
            let mut frames = vec![Frame::callback(
                endpoint::INVOKE_CALLBACK,
                cbor::to_vec(&CallbackInvocation {
                    token: 42,
                    stamp_ms: 1_000,
                    parameters: vec![],
                })
                .expect("serialize"),
            )];
            for request in requests {
                frames.push(Frame::response(request.id, request.endpoint, pong_body()));
            }
            frames
        })
        .await;

        let conn = Connection::connect_addr(addr).await.expect("connect");
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = seen.clone();
        conn.listener().register(
            42,
            Arc::new(move |invocation| {
                seen2.store(invocation.token, Ordering::SeqCst);
            }),
        );

        let first = conn.call_empty::<PingResponse>(endpoint::PING);
        let second = conn.call_empty::<PingResponse>(endpoint::PING);
        let (first, second) = tokio::join!(first, second);
        first.expect("first");
        second.expect("second");

        // The callback frame preceded the responses on the stream, so it
        // has been dispatched by now.
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        conn.close();
    }

    #[tokio::test]
    async fn test_pending_requests_cancelled_on_agent_death() {
        // An agent that accepts and immediately hangs up after the first
        // byte arrives.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1];
            use tokio::io::AsyncReadExt;
            let mut stream = stream;
            let _ = stream.read(&mut buf).await;
            drop(stream);
        });

        let conn = Connection::connect_addr(addr).await.expect("connect");
        let outcome = conn.call_empty::<PingResponse>(endpoint::PING).await;
        assert!(matches!(
            outcome,
            Err(ClientError::Cancelled(_) | ClientError::Transport(_))
        ));
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_request_after_close_fails_immediately() {
        let addr = fake_agent(|_| Vec::new()).await;
        let conn = Connection::connect_addr(addr).await.expect("connect");
        conn.close();
        let outcome = conn.call_empty::<PingResponse>(endpoint::PING).await;
        assert!(matches!(outcome, Err(ClientError::Transport(_))));
    }
}
