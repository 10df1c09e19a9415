//! Application layer use cases for the beacon.
//!
//! - **`listen`** – Runs one listening session at a time: starts the
//!   classifier, feeds its batches into the detection evaluator and closes the
//!   window when its timer fires.
//!
//! - **`export`** – Turns a finished detection into the alert document and
//!   hands it to the peer registry for delivery to every connected viewer.
//!
//! Neither module touches sockets or files directly.  The classifier arrives
//! as a trait object and delivery goes through [`sos_net::PeerRegistry`].

pub mod export;
pub mod listen;
