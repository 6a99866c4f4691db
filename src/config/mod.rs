//! Configuration module for flow-serial.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `FLOW_SERIAL_CONFIG` environment variable (explicit path)
//! 2. `./flow-serial.toml` (current directory)
//! 3. `flow-serial/config.toml` in the platform config directory
//!    (`~/.config` on Linux, `~/Library/Application Support` on macOS,
//!    `%APPDATA%` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `FLOW_SERIAL_<SECTION>_<KEY>`
//!
//! Examples:
//! - `FLOW_SERIAL_SERIAL_DEVICE=/dev/ttyUSB0`
//! - `FLOW_SERIAL_SERIAL_BAUD=115200`
//! - `FLOW_SERIAL_LOGGING_FORMAT=json`
//!
//! Legacy environment variables are also supported for hardware tests:
//! - `TEST_PORT`, `TEST_BAUD`, `LOOPBACK_ENABLED`
//!
//! # Example
//!
//! ```rust,no_run
//! use flow_serial::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Default baud: {}", config.serial.baud);
//! # Ok::<(), flow_serial::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{Config, LogFormat, LoggingConfig, SerialConfig, TestingConfig};
