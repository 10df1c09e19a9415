//! One framed byte stream and the task that owns it.
//!
//! Each session runs as a single tokio task that is the only code touching
//! the socket and the [`FrameDecoder`].  The rest of the program talks to it
//! through a cloneable [`SessionHandle`]:
//!
//! - outbound payloads go in through a bounded `mpsc` queue;
//! - inbound payloads and state transitions come out as [`SessionEvent`]s on
//!   the channel passed at spawn time;
//! - the current [`SessionState`] can be read or awaited at any time.
//!
//! ```text
//!   Connecting ──► Ready ──┬──► Failed(reason)
//!        │                 └──► Cancelled
//!        └──────────────────────► Failed / Cancelled
//! ```
//!
//! Terminal states drop the decoder, so a frame cut by a broken connection is
//! lost rather than resumed.  Queued outbound payloads nobody is waiting on
//! are handed back as [`SessionEvent::Undelivered`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sos_core::protocol::{encode_frame, FrameDecoder, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default ceiling for an inbound frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Identifies one session for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first 8 hex digits are enough to tell sessions apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Failed(String),
    Cancelled,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}

/// Notifications emitted by a session task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { id: SessionId, state: SessionState },
    /// A complete frame body, delivered once and in arrival order.
    PayloadReceived { id: SessionId, payload: Vec<u8> },
    /// A payload queued with [`SessionHandle::try_send`] that was never
    /// written.  Emitted just before the terminal `StateChanged`.
    Undelivered { id: SessionId, payload: Vec<u8> },
}

/// Errors surfaced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The outbound TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// The session has reached a terminal state.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The outbound queue is full; the caller may retry later.
    #[error("outbound queue of session {0} is full")]
    QueueFull(SessionId),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inbound frames announcing more than this are a protocol violation.
    pub max_frame_len: usize,
    /// Capacity of the outbound payload queue.
    pub outbound_capacity: usize,
    /// Size of the read buffer handed to the socket.
    pub read_chunk_size: usize,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_capacity: 16,
            read_chunk_size: 8 * 1024,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct Outbound {
    payload: Vec<u8>,
    done: Option<oneshot::Sender<Result<(), TransportError>>>,
}

/// Cloneable handle to a running session task.
///
/// Dropping the last handle cancels the session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    outbound: mpsc::Sender<Outbound>,
    state: watch::Receiver<SessionState>,
    cancel: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Sends one payload and waits until its frame has been written.
    ///
    /// # Errors
    ///
    /// - [`TransportError::SessionClosed`] if the session ended before the
    ///   frame was written.
    /// - The write error itself; the session is `Failed` afterwards.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                payload,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| TransportError::SessionClosed(self.id))?;
        done_rx
            .await
            .map_err(|_| TransportError::SessionClosed(self.id))?
    }

    /// Queues one payload without waiting for the write.
    ///
    /// # Errors
    ///
    /// [`TransportError::QueueFull`] or [`TransportError::SessionClosed`].
    pub fn try_send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.outbound
            .try_send(Outbound {
                payload,
                done: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(self.id),
                mpsc::error::TrySendError::Closed(_) => TransportError::SessionClosed(self.id),
            })
    }

    /// Asks the session to stop.  No payload events follow once the task
    /// observes the request; a read already completing is discarded.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Waits until the session reaches a terminal state and returns it.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.state.clone();
        let result = rx.wait_for(SessionState::is_terminal).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            // The task is gone; its last published state is final.
            Err(_) => rx.borrow().clone(),
        }
    }
}

/// Spawns a session over an already connected stream.  It is `Ready` at once.
pub fn spawn_session<S>(
    stream: S,
    peer_addr: Option<SocketAddr>,
    events: mpsc::Sender<SessionEvent>,
    config: SessionConfig,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, task) = new_session(peer_addr, events, config);
    tokio::spawn(async move {
        task.run(stream).await;
    });
    handle
}

/// Spawns a session that first connects to `addr`.
///
/// The handle is returned immediately in `Connecting`; a failed or timed out
/// connect moves it to `Failed` and emits the transition as an event.
pub fn connect(
    addr: SocketAddr,
    events: mpsc::Sender<SessionEvent>,
    config: SessionConfig,
) -> SessionHandle {
    let timeout = config.connect_timeout;
    let (handle, mut task) = new_session(Some(addr), events, config);
    tokio::spawn(async move {
        let connecting = tokio::time::timeout(timeout, TcpStream::connect(addr));
        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(&mut task.cancel) => None,
            result = connecting => Some(result),
        };
        match outcome {
            None => task.finish(SessionState::Cancelled, Vec::new()).await,
            Some(Ok(Ok(stream))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("session {}: set_nodelay failed: {e}", task.id);
                }
                task.run(stream).await;
            }
            Some(Ok(Err(source))) => {
                let err = TransportError::ConnectFailed { addr, source };
                warn!("session {}: {err}", task.id);
                task.finish(SessionState::Failed(err.to_string()), Vec::new()).await;
            }
            Some(Err(_)) => {
                let err = TransportError::ConnectTimeout(addr);
                warn!("session {}: {err}", task.id);
                task.finish(SessionState::Failed(err.to_string()), Vec::new()).await;
            }
        }
    });
    handle
}

fn new_session(
    peer_addr: Option<SocketAddr>,
    events: mpsc::Sender<SessionEvent>,
    config: SessionConfig,
) -> (SessionHandle, SessionTask) {
    let id = SessionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let handle = SessionHandle {
        id,
        peer_addr,
        outbound: outbound_tx,
        state: state_rx,
        cancel: Arc::new(cancel_tx),
    };
    let task = SessionTask {
        id,
        peer_addr,
        config,
        outbound: outbound_rx,
        state: state_tx,
        cancel: cancel_rx,
        events,
    };
    (handle, task)
}

/// Resolves once cancellation is requested or the sending side is dropped.
pub(crate) async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    // An error means the sender (held by the handles) is gone.
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

struct SessionTask {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    config: SessionConfig,
    outbound: mpsc::Receiver<Outbound>,
    state: watch::Sender<SessionState>,
    cancel: watch::Receiver<bool>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionTask {
    async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(SessionState::Ready).await;
        match self.peer_addr {
            Some(addr) => info!("session {} ready ({addr})", self.id),
            None => info!("session {} ready", self.id),
        }

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut decoder = FrameDecoder::with_max_frame_len(self.config.max_frame_len);
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        let mut undelivered = Vec::new();

        let terminal = loop {
            tokio::select! {
                biased;

                _ = wait_cancelled(&mut self.cancel) => {
                    debug!("session {}: cancelled", self.id);
                    break SessionState::Cancelled;
                }

                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        if let Err(e) = decoder.finish() {
                            warn!("session {}: protocol violation at end of stream: {e}", self.id);
                        }
                        info!("session {}: closed by peer", self.id);
                        break SessionState::Failed("connection closed by peer".to_string());
                    }
                    Ok(n) => {
                        decoder.push(&buf[..n]);
                        if let Err(e) = self.deliver_frames(&mut decoder).await {
                            warn!("session {}: protocol violation, closing: {e}", self.id);
                            break SessionState::Failed(e.to_string());
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if *self.cancel.borrow() || is_benign_abort(&e) => {
                        debug!("session {}: read aborted while closing: {e}", self.id);
                        break SessionState::Cancelled;
                    }
                    Err(e) => {
                        warn!("session {}: read failed: {e}", self.id);
                        break SessionState::Failed(e.to_string());
                    }
                },

                Some(out) = self.outbound.recv() => {
                    let written = write_frame(&mut writer, &out.payload).await;
                    let failure = written.as_ref().err().map(ToString::to_string);
                    match out.done {
                        Some(done) => {
                            let _ = done.send(written);
                        }
                        None if failure.is_some() => undelivered.push(out.payload),
                        None => {}
                    }
                    if let Some(reason) = failure {
                        warn!("session {}: send failed: {reason}", self.id);
                        break SessionState::Failed(reason);
                    }
                }
            }
        };

        let _ = writer.shutdown().await;
        self.finish(terminal, undelivered).await;
    }

    /// Hands every complete frame in the decoder to the event channel.
    async fn deliver_frames(&self, decoder: &mut FrameDecoder) -> Result<(), ProtocolError> {
        while let Some(payload) = decoder.next_frame()? {
            if *self.cancel.borrow() {
                // Stopped sessions deliver nothing further.
                return Ok(());
            }
            debug!("session {}: received {} byte payload", self.id, payload.len());
            let event = SessionEvent::PayloadReceived {
                id: self.id,
                payload,
            };
            if self.events.send(event).await.is_err() {
                debug!("session {}: event receiver dropped", self.id);
            }
        }
        Ok(())
    }

    /// Publishes the terminal state, fails any awaited sends, and hands
    /// unwritten fire-and-forget payloads back through the event channel.
    async fn finish(mut self, terminal: SessionState, mut undelivered: Vec<Vec<u8>>) {
        self.outbound.close();
        while let Ok(out) = self.outbound.try_recv() {
            match out.done {
                Some(done) => {
                    let _ = done.send(Err(TransportError::SessionClosed(self.id)));
                }
                None => undelivered.push(out.payload),
            }
        }
        for payload in undelivered {
            warn!(
                "session {}: {} byte payload was never written ({terminal:?})",
                self.id,
                payload.len()
            );
            let event = SessionEvent::Undelivered {
                id: self.id,
                payload,
            };
            if self.events.send(event).await.is_err() {
                debug!("session {}: event receiver dropped", self.id);
            }
        }
        self.transition(terminal).await;
    }

    async fn transition(&self, state: SessionState) {
        self.state.send_replace(state.clone());
        let event = SessionEvent::StateChanged { id: self.id, state };
        if self.events.send(event).await.is_err() {
            debug!("session {}: event receiver dropped", self.id);
        }
    }
}

async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Errors a socket reports when it is torn down underneath a pending read.
fn is_benign_abort(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionAborted)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
