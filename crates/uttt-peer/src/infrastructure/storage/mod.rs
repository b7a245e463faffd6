//! Persistence: TOML configuration on disk.

pub mod config;

pub use config::{AppConfig, ConfigError};
