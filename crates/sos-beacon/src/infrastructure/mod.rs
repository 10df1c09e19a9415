//! Infrastructure layer for the beacon.
//!
//! Contains the adapters the application layer is wired to at start-up: the
//! sound classifier seam and the TOML configuration store.

pub mod classifier;
pub mod storage;
