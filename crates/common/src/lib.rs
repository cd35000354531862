//! Common utilities for the usbip-vhci workspace
//!
//! This crate provides the ambient pieces shared by the pairing core:
//! error types, logging setup, TOML configuration, and test helpers.

pub mod config;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use config::{ControllerSettings, LoggingSettings, PoolSettings, VhciConfig, load_config};
pub use error::{Error, Result};
pub use logging::setup_logging;
