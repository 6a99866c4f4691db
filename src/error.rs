//! Error taxonomy shared by every serial operation.
//!
//! OS-specific failures are normalized into a small set of kinds so callers
//! (and binding layers that only understand integer codes) can react without
//! caring which platform produced them.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for serial operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or using a serial port.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic I/O failure not covered by a more specific kind.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Insufficient permission to open the device.
    #[error("Access to serial port denied: {0}")]
    AccessDenied(String),

    /// The device exists but is already held by another owner.
    #[error("Serial port is busy: {0}")]
    Busy(String),

    /// The requested line configuration is not supported.
    #[error("Invalid serial settings: {0}")]
    InvalidSettings(String),

    /// A blocking read was woken by an explicit interrupt before any data arrived.
    #[error("Read was interrupted")]
    Interrupted,

    /// The named device does not exist.
    #[error("Serial port not found: {0}")]
    NoPort(String),

    /// The connection was closed before or during the operation.
    #[error("Serial port is closed: {0}")]
    PortClosed(String),

    /// A deadline-bounded read expired without receiving data.
    #[error("Read timed out after {0:?}")]
    TimedOut(Duration),
}

/// Discriminant of [`Error`], convenient for matching and for binding codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    AccessDenied,
    Busy,
    InvalidSettings,
    Interrupt,
    NoPort,
    PortClosed,
    TimedOut,
}

impl ErrorKind {
    /// Stable integer code for binding layers.
    ///
    /// The six core kinds map onto `-1..=-6`; connection-level kinds continue
    /// the sequence.
    pub fn code(self) -> i32 {
        match self {
            Self::Io => -1,
            Self::AccessDenied => -2,
            Self::Busy => -3,
            Self::InvalidSettings => -4,
            Self::Interrupt => -5,
            Self::NoPort => -6,
            Self::PortClosed => -7,
            Self::TimedOut => -8,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "io",
            Self::AccessDenied => "access denied",
            Self::Busy => "busy",
            Self::InvalidSettings => "invalid settings",
            Self::Interrupt => "interrupt",
            Self::NoPort => "no port",
            Self::PortClosed => "port closed",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Create a NoPort error from a device name.
    pub fn no_port(device: impl Into<String>) -> Self {
        Self::NoPort(device.into())
    }

    /// Create an AccessDenied error from a device name.
    pub fn access_denied(device: impl Into<String>) -> Self {
        Self::AccessDenied(device.into())
    }

    /// Create a Busy error from a device name.
    pub fn busy(device: impl Into<String>) -> Self {
        Self::Busy(device.into())
    }

    /// Create an InvalidSettings error from a message.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    /// Create a PortClosed error from a device name.
    pub fn port_closed(device: impl Into<String>) -> Self {
        Self::PortClosed(device.into())
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Busy(_) => ErrorKind::Busy,
            Self::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Self::Interrupted => ErrorKind::Interrupt,
            Self::NoPort(_) => ErrorKind::NoPort,
            Self::PortClosed(_) => ErrorKind::PortClosed,
            Self::TimedOut(_) => ErrorKind::TimedOut,
        }
    }

    /// Whether this error is the benign result of an explicit interrupt.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(e) => e.kind(),
            Error::AccessDenied(_) => io::ErrorKind::PermissionDenied,
            Error::Busy(_) => io::ErrorKind::Other,
            Error::InvalidSettings(_) => io::ErrorKind::InvalidInput,
            Error::Interrupted => io::ErrorKind::Interrupted,
            Error::NoPort(_) => io::ErrorKind::NotFound,
            Error::PortClosed(_) => io::ErrorKind::NotConnected,
            Error::TimedOut(_) => io::ErrorKind::TimedOut,
        };
        match err {
            Error::Io(e) => e,
            other => io::Error::new(kind, other.to_string()),
        }
    }
}
