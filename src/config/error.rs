//! Failures while loading, checking or saving a flow-serial configuration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`ConfigLoader`](super::ConfigLoader) and [`Config::validate`](super::Config::validate).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("cannot {operation} configuration file '{}': {source}", .path.display())]
    File {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("malformed configuration: {0}")]
    Syntax(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),

    /// The `[serial]` line settings do not describe an openable port.
    #[error("serial line settings rejected: {0}")]
    LineSettings(#[from] crate::Error),

    /// `serial.buffer_size` is zero.
    #[error("serial.buffer_size must be greater than zero")]
    EmptyBuffer,

    /// A `FLOW_SERIAL_*` or legacy test variable holds an unusable value.
    #[error("environment variable {var}={value:?} is invalid: expected {expected}")]
    Environment {
        var: String,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn file(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn environment(var: impl Into<String>, value: &str, expected: &'static str) -> Self {
        Self::Environment {
            var: var.into(),
            value: value.trim().to_string(),
            expected,
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
