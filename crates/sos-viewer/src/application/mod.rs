//! Application layer for the viewer.
//!
//! - **`alert_feed`** – Decodes alert frames into records with locally minted
//!   identifiers and keeps them newest first for display.

pub mod alert_feed;
