//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the beacon's TOML file from the platform
//! config directory, falls back to defaults on first run and writes changes
//! back when asked.

pub mod config;
