//! Types shared by both discovery roles.
//!
//! # How discovery works (for beginners)
//!
//! The beacon and the viewer sit on the same LAN but neither knows the
//! other's address.  Discovery uses two UDP datagrams on a well-known port:
//!
//! 1. The viewer's [`crate::ServiceBrowser`] broadcasts a `Query` naming the
//!    service type it is looking for, and repeats it every few seconds.
//! 2. The beacon's [`crate::ServiceAdvertiser`] listens on the discovery port
//!    and answers each matching query with a unicast `Announce` carrying its
//!    instance name and the ephemeral TCP port it accepts alert streams on.
//! 3. The browser turns the announcement's source IP plus that port into a
//!    [`ServiceEndpoint`] and hands it to the application, which connects.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use sos_core::protocol::{DEFAULT_DISCOVERY_PORT, SERVICE_NAME, SERVICE_TYPE};
use thiserror::Error;

/// Errors raised while setting up discovery sockets.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A UDP or TCP socket could not be bound.
    #[error("failed to bind {what} on {addr}: {source}")]
    BindFailed {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A socket option could not be applied.
    #[error("failed to configure discovery socket: {0}")]
    Socket(#[source] io::Error),
}

/// The service type and instance name a beacon advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub service_type: String,
    pub instance_name: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            instance_name: SERVICE_NAME.to_string(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance_name, self.service_type)
    }
}

/// A resolved advertiser, ready to be connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub instance_name: String,
    pub addr: SocketAddr,
    pub protocol_version: u8,
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.instance_name, self.addr)
    }
}

/// Settings for the advertiser role.
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    pub identity: ServiceIdentity,
    /// UDP port queries arrive on.
    pub discovery_port: u16,
    /// Address the TCP listener and UDP responder bind to.
    pub bind_address: IpAddr,
    /// TCP port for alert streams; 0 picks an ephemeral port.
    pub stream_port: u16,
}

impl Default for AdvertiserConfig {
    fn default() -> Self {
        Self {
            identity: ServiceIdentity::default(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            stream_port: 0,
        }
    }
}

/// Settings for the browser role.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub identity: ServiceIdentity,
    /// UDP port advertisers listen on.
    pub discovery_port: u16,
    /// Where queries are sent; the limited broadcast address by default.
    pub query_address: IpAddr,
    pub query_interval: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            identity: ServiceIdentity::default(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            query_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            query_interval: Duration::from_secs(3),
        }
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
