//! Browser role: find advertisers on the LAN.
//!
//! While browsing, a single task owns an ephemeral UDP socket.  It sends a
//! `Query` to the configured query address every `query_interval` and turns
//! matching `Announce` replies into [`ServiceEndpoint`]s.  Each endpoint is
//! reported once, and again only if its address changes.
//!
//! Only one browse runs at a time: starting again cancels the previous one
//! before the new socket is bound.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use sos_core::protocol::discovery::MAX_DATAGRAM_SIZE;
use sos_core::protocol::DiscoveryDatagram;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::discovery::{is_transient, BrowserConfig, DiscoveryError, ServiceEndpoint, ServiceIdentity};
use crate::session::wait_cancelled;

/// Observable state of the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserStatus {
    Idle,
    Browsing,
    Failed(String),
}

impl fmt::Display for BrowserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Browsing => f.write_str("browsing"),
            Self::Failed(reason) => write!(f, "browse failed: {reason}"),
        }
    }
}

struct ActiveBrowse {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Looks for advertisers of one service type.
pub struct ServiceBrowser {
    config: BrowserConfig,
    status: watch::Sender<BrowserStatus>,
    active: Option<ActiveBrowse>,
}

impl ServiceBrowser {
    pub fn new(config: BrowserConfig) -> Self {
        let (status, _) = watch::channel(BrowserStatus::Idle);
        Self {
            config,
            status,
            active: None,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BrowserStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> BrowserStatus {
        self.status.borrow().clone()
    }

    pub fn is_browsing(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a fresh browse and returns the stream of found endpoints.
    ///
    /// Any previous browse is cancelled first.  If the socket cannot be set
    /// up, the status becomes `Failed` and the returned stream is already
    /// closed.
    pub async fn start_browsing(&mut self) -> mpsc::Receiver<ServiceEndpoint> {
        self.stop_browsing().await;

        let (tx, rx) = mpsc::channel(16);
        let socket = match bind_query_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                error!("cannot browse for {}: {e}", self.config.identity.service_type);
                self.status.send_replace(BrowserStatus::Failed(e.to_string()));
                return rx;
            }
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(browse_loop(socket, self.config.clone(), tx, cancel_rx));
        self.active = Some(ActiveBrowse { cancel, task });
        self.status.send_replace(BrowserStatus::Browsing);
        info!("browsing for {}", self.config.identity.service_type);
        rx
    }

    /// Cancels the browse and releases its socket.  Idempotent.
    pub async fn stop_browsing(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.send_replace(true);
        if let Err(e) = active.task.await {
            warn!("browse task ended abnormally: {e}");
        }
        self.status.send_replace(BrowserStatus::Idle);
        debug!("browse stopped");
    }
}

async fn bind_query_socket() -> Result<UdpSocket, DiscoveryError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| DiscoveryError::BindFailed {
            what: "discovery browser",
            addr,
            source,
        })?;
    socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;
    Ok(socket)
}

async fn browse_loop(
    socket: UdpSocket,
    config: BrowserConfig,
    endpoints: mpsc::Sender<ServiceEndpoint>,
    mut cancel: watch::Receiver<bool>,
) {
    let target = SocketAddr::new(config.query_address, config.discovery_port);
    let query = match DiscoveryDatagram::query(&config.identity.service_type).encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to encode query: {e}");
            return;
        }
    };
    let mut ticker = tokio::time::interval(config.query_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seen: HashMap<(String, IpAddr), u16> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => break,
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&query, target).await {
                    warn!("discovery query to {target} failed: {e}");
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let Some(endpoint) = parse_announce(&buf[..len], src, &config.identity) else {
                        continue;
                    };
                    let key = (endpoint.instance_name.clone(), endpoint.addr.ip());
                    if seen.insert(key, endpoint.addr.port()) == Some(endpoint.addr.port()) {
                        continue;
                    }
                    info!("found {endpoint}");
                    if endpoints.send(endpoint).await.is_err() {
                        debug!("endpoint receiver dropped; ending browse");
                        break;
                    }
                }
                Err(e) if is_transient(&e) => continue,
                Err(e) => debug!("discovery recv error: {e}"),
            },
        }
    }
}

/// Turns an `Announce` for `identity`'s service type into an endpoint.
///
/// The endpoint address is the datagram's source IP with the announced port.
pub fn parse_announce(
    bytes: &[u8],
    src: SocketAddr,
    identity: &ServiceIdentity,
) -> Option<ServiceEndpoint> {
    match DiscoveryDatagram::decode(bytes) {
        Ok(DiscoveryDatagram::Announce {
            service_type,
            instance_name,
            port,
            protocol_version,
        }) if service_type == identity.service_type => Some(ServiceEndpoint {
            instance_name,
            addr: SocketAddr::new(src.ip(), port),
            protocol_version,
        }),
        Ok(_) => None,
        Err(e) => {
            debug!("undecodable datagram from {src}: {e}");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
