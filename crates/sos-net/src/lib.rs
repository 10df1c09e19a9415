//! # sos-net
//!
//! LAN plumbing shared by the SOS-Link beacon and viewer:
//!
//! - **`discovery`**, **`advertiser`**, **`browser`**: UDP query/announce
//!   discovery of the alert service, in both roles.
//! - **`session`**: one task per TCP connection, turning the byte stream into
//!   whole frames with [`sos_core::FrameDecoder`] and writing outbound frames.
//! - **`registry`**: the advertiser's peer set, fanning each alert out to
//!   every ready viewer and holding the latest one until a viewer appears.
//!
//! Every long-lived component is an explicitly constructed object whose state
//! is mutated by exactly one tokio task.

pub mod advertiser;
pub mod browser;
pub mod discovery;
pub mod registry;
pub mod session;

pub use advertiser::{AdvertiserStatus, ServiceAdvertiser};
pub use browser::{BrowserStatus, ServiceBrowser};
pub use discovery::{
    AdvertiserConfig, BrowserConfig, DiscoveryError, ServiceEndpoint, ServiceIdentity,
};
pub use registry::{BroadcastOutcome, PeerLink, PeerRegistry, RegistrySnapshot};
pub use session::{
    connect, spawn_session, SessionConfig, SessionEvent, SessionHandle, SessionId, SessionState,
    TransportError,
};
