//! Protocol module containing the framing codec, the alert payload, and the
//! discovery datagrams.

pub mod codec;
pub mod discovery;
pub mod payload;

pub use codec::{encode_frame, FrameDecoder, ProtocolError, LENGTH_PREFIX_SIZE};
pub use discovery::{
    DiscoveryDatagram, DEFAULT_DISCOVERY_PORT, DISCOVERY_PROTOCOL_VERSION, SERVICE_NAME,
    SERVICE_TYPE,
};
pub use payload::{Address, Detection, ExportPayload, Location, PayloadError, UserProfile};
