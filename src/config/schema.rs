//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! All configuration sections are defined here with appropriate defaults.

use super::error::{ConfigError, ConfigResult};
use crate::operator::DEFAULT_BUFFER_SIZE;
use crate::settings::{Parity, SerialSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Hardware testing configuration
    pub testing: TestingConfig,
}

impl Config {
    /// Check values that serde cannot check on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        self.serial.settings().validate()?;
        if self.serial.buffer_size == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device to open when none is given on the command line
    pub device: Option<String>,
    /// Baud rate
    pub baud: u32,
    /// Data bits per character (5-8)
    pub character_size: u8,
    /// Use two stop bits
    pub two_stop_bits: bool,
    /// Parity: "none", "odd" or "even"
    pub parity: Parity,
    /// Reader buffer size in bytes
    pub buffer_size: usize,
    /// Deadline for one-shot reads, in milliseconds
    pub read_timeout_ms: Option<u64>,
    /// Port aliases for convenience
    #[serde(default)]
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let settings = SerialSettings::default();
        Self {
            device: None,
            baud: settings.baud,
            character_size: settings.character_size,
            two_stop_bits: settings.two_stop_bits,
            parity: settings.parity,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout_ms: None,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// The configured line settings (unvalidated).
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            baud: self.baud,
            character_size: self.character_size,
            two_stop_bits: self.two_stop_bits,
            parity: self.parity,
        }
    }

    /// Get the read timeout as Duration, if set
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Emit diagnostics for every failed OS call
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            debug: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Test port name
    pub port: Option<String>,
    /// Test baud rate
    pub baud: u32,
    /// Whether TX is wired back to RX on the test port
    pub loopback_enabled: bool,
    /// Test timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            loopback_enabled: false,
            timeout_ms: 2000,
        }
    }
}

impl TestingConfig {
    /// Get the test timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
