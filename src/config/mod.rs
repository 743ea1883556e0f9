//! Configuration module for SFTP Relay
//!
//! Provides configuration management: CLI arguments, environment capture
//! and the immutable runtime settings passed to every component.

mod settings;

pub use settings::*;
