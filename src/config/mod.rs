//! Configuration module for serial-sharer.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_SHARER_CONFIG` environment variable (explicit path)
//! 2. `./serial-sharer.toml` (current directory)
//! 3. `serial-sharer/serial-sharer.toml` in the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example file
//!
//! ```toml
//! [shared]
//! device = "/dev/ttyUSB0"
//!
//! [controllers]
//! devices = ["/dev/ttyUSB1", "/dev/ttyUSB2"]
//!
//! [link]
//! baud_rate = 57600
//! read_timeout_ms = 1000
//!
//! [arbiter]
//! backoff_ms = 100
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    ArbiterConfig, Config, ControllersConfig, LinkConfig, LogFormat, LoggingConfig, SharedConfig,
};
