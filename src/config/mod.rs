//! Configuration for the hub and subscriber
//!
//! Supports loading configuration from TOML files and environment variables.

mod settings;

pub use settings::*;
