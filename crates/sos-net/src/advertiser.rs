//! Advertiser role: accept viewer connections and answer discovery queries.
//!
//! [`ServiceAdvertiser::start`] binds an ephemeral TCP port for alert streams
//! and a UDP socket on the discovery port, then runs two tasks:
//!
//! - the **accept loop** wraps each inbound connection in a session and
//!   hands it to the [`PeerRegistry`];
//! - the **responder** answers every `Query` for our service type with an
//!   `Announce` naming the TCP port.
//!
//! Setup failures do not propagate as errors.  They are published on the
//! status channel as [`AdvertiserStatus::Failed`] and the caller decides
//! whether to call `start` again.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use sos_core::protocol::discovery::MAX_DATAGRAM_SIZE;
use sos_core::protocol::DiscoveryDatagram;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::discovery::{is_transient, AdvertiserConfig, DiscoveryError, ServiceIdentity};
use crate::registry::{BroadcastOutcome, PeerRegistry};
use crate::session::{spawn_session, wait_cancelled, SessionConfig};

/// Back-off after a non-transient accept error so a broken listener cannot spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Observable state of the advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiserStatus {
    Stopped,
    Starting,
    /// Advertising, with alert streams accepted on `port`.
    Ready { port: u16 },
    Failed(String),
}

impl fmt::Display for AdvertiserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Starting => f.write_str("starting"),
            Self::Ready { port } => write!(f, "advertising on port {port}"),
            Self::Failed(reason) => write!(f, "advertising failed: {reason}"),
        }
    }
}

struct Running {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stream_addr: SocketAddr,
    discovery_addr: SocketAddr,
}

/// Publishes the alert service on the LAN and feeds connected viewers.
pub struct ServiceAdvertiser {
    config: AdvertiserConfig,
    session_config: SessionConfig,
    registry: PeerRegistry,
    status: watch::Sender<AdvertiserStatus>,
    running: Option<Running>,
}

impl ServiceAdvertiser {
    pub fn new(
        config: AdvertiserConfig,
        session_config: SessionConfig,
        registry: PeerRegistry,
    ) -> Self {
        let (status, _) = watch::channel(AdvertiserStatus::Stopped);
        Self {
            config,
            session_config,
            registry,
            status,
            running: None,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AdvertiserStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> AdvertiserStatus {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address alert streams are accepted on while running.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.stream_addr)
    }

    /// Address of the UDP responder while running.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.discovery_addr)
    }

    /// Binds the sockets and starts advertising.  A second call while running
    /// only logs a warning.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            warn!("advertiser already started; ignoring start request");
            return;
        }
        self.status.send_replace(AdvertiserStatus::Starting);

        let (listener, socket) = match self.bind().await {
            Ok(sockets) => sockets,
            Err(e) => {
                error!("cannot advertise {}: {e}", self.config.identity);
                self.status.send_replace(AdvertiserStatus::Failed(e.to_string()));
                return;
            }
        };
        let (stream_addr, discovery_addr) = match (listener.local_addr(), socket.local_addr()) {
            (Ok(stream), Ok(discovery)) => (stream, discovery),
            (Err(e), _) | (_, Err(e)) => {
                error!("cannot read advertiser socket address: {e}");
                self.status.send_replace(AdvertiserStatus::Failed(e.to_string()));
                return;
            }
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.session_config.clone(),
            cancel_rx.clone(),
        ));
        let respond = tokio::spawn(respond_loop(
            socket,
            self.config.identity.clone(),
            stream_addr.port(),
            cancel_rx,
        ));

        info!(
            "advertising {} on TCP {stream_addr} (discovery UDP {discovery_addr})",
            self.config.identity
        );
        self.status.send_replace(AdvertiserStatus::Ready {
            port: stream_addr.port(),
        });
        self.running = Some(Running {
            cancel,
            tasks: vec![accept, respond],
            stream_addr,
            discovery_addr,
        });
    }

    /// Stops advertising and cancels every connected session.  Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("advertiser not running; nothing to stop");
            return;
        };
        running.cancel.send_replace(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!("advertiser task ended abnormally: {e}");
            }
        }
        self.registry.disconnect_all().await;
        self.status.send_replace(AdvertiserStatus::Stopped);
        info!("advertiser stopped");
    }

    /// Sends `payload` to every connected viewer, or holds it until one connects.
    pub async fn broadcast(&self, payload: Vec<u8>) -> BroadcastOutcome {
        self.registry.broadcast(payload).await
    }

    async fn bind(&self) -> Result<(TcpListener, UdpSocket), DiscoveryError> {
        let stream_addr = SocketAddr::new(self.config.bind_address, self.config.stream_port);
        let listener = TcpListener::bind(stream_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                what: "alert listener",
                addr: stream_addr,
                source,
            })?;

        let discovery_addr = SocketAddr::new(self.config.bind_address, self.config.discovery_port);
        let socket = UdpSocket::bind(discovery_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                what: "discovery responder",
                addr: discovery_addr,
                source,
            })?;
        Ok((listener, socket))
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: PeerRegistry,
    session_config: SessionConfig,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("viewer connected from {peer}");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay for {peer} failed: {e}");
                    }
                    let handle = spawn_session(
                        stream,
                        Some(peer),
                        registry.event_sender(),
                        session_config.clone(),
                    );
                    registry.register(Box::new(handle)).await;
                }
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn respond_loop(
    socket: UdpSocket,
    identity: ServiceIdentity,
    stream_port: u16,
    mut cancel: watch::Receiver<bool>,
) {
    let announce =
        match DiscoveryDatagram::announce(&identity.service_type, &identity.instance_name, stream_port)
            .encode()
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode announcement: {e}");
                return;
            }
        };
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => match DiscoveryDatagram::decode(&buf[..len]) {
                    Ok(DiscoveryDatagram::Query { service_type })
                        if service_type == identity.service_type =>
                    {
                        debug!("query from {src}; announcing port {stream_port}");
                        if let Err(e) = socket.send_to(&announce, src).await {
                            warn!("failed to announce to {src}: {e}");
                        }
                    }
                    Ok(other) => {
                        debug!("ignoring {} datagram from {src}", other.service_type());
                    }
                    Err(e) => debug!("undecodable datagram from {src}: {e}"),
                },
                Err(e) if is_transient(&e) => continue,
                // Includes ICMP port-unreachable echoes on some platforms.
                Err(e) => debug!("discovery recv error: {e}"),
            },
        }
    }
    debug!("discovery responder stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
