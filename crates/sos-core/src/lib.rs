//! # sos-core
//!
//! Shared library for SOS-Link containing the wire framing codec, the alert
//! payload model, the discovery datagrams, and the sound detection evaluator.
//!
//! This crate is used by both the beacon (the phone-side advertiser) and the
//! viewer (the desktop-side browser).  It has zero dependencies on sockets,
//! async runtimes, or audio APIs.
//!
//! # Architecture overview (for beginners)
//!
//! SOS-Link listens for emergency sounds (fire crackling, screams, sirens...)
//! on one machine and streams a short alert to a companion viewer on the same
//! local network.
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   4-byte big-endian length followed by a UTF-8 JSON document.  The
//!   [`FrameDecoder`] turns an arbitrarily chunked byte stream back into whole
//!   messages.
//!
//! - **`evaluator`** – Pure detection logic.  A noisy stream of classifier
//!   scores is collected over a fixed window, pinned by a short "lock" to
//!   suppress flicker, and reduced to a ranked top-N [`DetectionResult`].

pub mod evaluator;
pub mod protocol;

pub use evaluator::{
    Classification, ClassificationSample, DetectionEvaluator, DetectionResult, EvaluationError,
    EvaluatorConfig, EvaluatorState, LockState, RankedDetection,
};
pub use protocol::codec::{encode_frame, FrameDecoder, ProtocolError};
pub use protocol::discovery::DiscoveryDatagram;
pub use protocol::payload::{Address, Detection, ExportPayload, Location, PayloadError, UserProfile};
