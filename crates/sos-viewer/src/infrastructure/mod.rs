//! Infrastructure layer for the viewer.
//!
//! - **`viewer_link`** – Browses for beacons, keeps one alert stream open and
//!   feeds what arrives into the [`crate::application::alert_feed::AlertFeed`].
//! - **`storage`** – TOML configuration persistence.

pub mod storage;
pub mod viewer_link;
