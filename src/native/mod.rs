//! Native serial port handle.
//!
//! [`SerialPort`] owns the OS device handle, the applied [`LineConfig`] and an
//! interrupt channel that lets another thread wake a blocked [`SerialPort::read`]
//! without closing the device.
//!
//! # Concurrency
//!
//! `read`, `write` and `interrupt` borrow the port immutably and may be called
//! from several threads at once (one reader and one writer is the intended
//! pattern). `close` consumes the port, so it cannot overlap with an in-flight
//! operation and the port cannot be used afterwards.
//!
//! # Interrupts
//!
//! An interrupt issued while no read is blocked stays armed and makes the next
//! read return [`Error::Interrupted`] unless data is already waiting.
//! Interrupts coalesce: several calls before a read consumes them count once.

use crate::error::{Error, Result};
use crate::settings::{LineConfig, SerialSettings};
use tracing::{debug, trace};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as sys;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as sys;

/// Whether the platform can program `baud`.
pub fn is_supported_baud(baud: u32) -> bool {
    sys::is_supported_baud(baud)
}

/// Every baud rate the platform can program, in ascending order.
pub fn supported_baud_rates() -> Vec<u32> {
    sys::supported_baud_rates()
}

/// An open serial port.
pub struct SerialPort {
    /// The device path/name for identification.
    name: String,
    /// Settings applied when the port was opened.
    config: LineConfig,
    raw: sys::RawPort,
}

impl SerialPort {
    /// Open a serial port with the given configuration.
    ///
    /// # Errors
    /// * [`Error::NoPort`] if the device does not exist
    /// * [`Error::AccessDenied`] if permissions are insufficient
    /// * [`Error::Busy`] if the device is held by another owner
    /// * [`Error::InvalidSettings`] if the device rejects the configuration
    /// * [`Error::Io`] on any other failure
    ///
    /// No resource is left behind when opening fails.
    ///
    /// # Example
    /// ```no_run
    /// use flow_serial::{SerialPort, SerialSettings};
    ///
    /// let config = SerialSettings::with_baud(115200).validate()?;
    /// let port = SerialPort::open("/dev/ttyUSB0", config)?;
    /// port.write(b"AT\r\n")?;
    /// port.close()?;
    /// # Ok::<(), flow_serial::Error>(())
    /// ```
    pub fn open(device: &str, config: LineConfig) -> Result<Self> {
        let raw = sys::open(device, &config)?;
        debug!(device, %config, "opened serial port");
        Ok(Self {
            name: device.to_string(),
            config,
            raw,
        })
    }

    /// Validate `settings` and open the device.
    ///
    /// Validation happens first, so invalid settings never reach the OS.
    pub fn open_with(device: &str, settings: &SerialSettings) -> Result<Self> {
        Self::open(device, settings.validate()?)
    }

    /// Block until data is available and read it into `buffer`.
    ///
    /// Returns the number of bytes read, which is always positive unless
    /// `buffer` is empty. Returns [`Error::Interrupted`] when woken by
    /// [`interrupt`](Self::interrupt) before any byte was received; bytes that
    /// did arrive are always returned instead of the interrupt.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.raw.read(buffer, &self.name)?;
        trace!(port = %self.name, bytes = n, "read");
        Ok(n)
    }

    /// Write as much of `data` as the device accepts in one operation.
    ///
    /// Blocks until at least one byte can be written. A zero-length `data`
    /// returns `Ok(0)`.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let n = self.raw.write(data, &self.name)?;
        trace!(port = %self.name, bytes = n, "write");
        Ok(n)
    }

    /// Wake a blocked [`read`](Self::read), or arm the next one.
    pub fn interrupt(&self) -> Result<()> {
        trace!(port = %self.name, "interrupt");
        self.raw.interrupt(&self.name)
    }

    /// Withdraw an armed interrupt that no read has consumed.
    pub(crate) fn clear_interrupt(&self) {
        self.raw.clear_interrupt();
    }

    /// Release the device and its interrupt channel.
    ///
    /// Resources are released even when an error is returned; the port must
    /// not be reopened through this value in any case.
    pub fn close(self) -> Result<()> {
        debug!(port = %self.name, "closing serial port");
        self.raw.close(&self.name)
    }

    /// Get the name/path of this serial port.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the applied line configuration.
    pub fn config(&self) -> &LineConfig {
        &self.config
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Convenience for callers that hold raw binding-layer values.
pub fn open_raw(
    device: &str,
    baud: i32,
    character_size: i32,
    two_stop_bits: bool,
    parity: i32,
) -> Result<SerialPort> {
    let config = LineConfig::from_raw(baud, character_size, two_stop_bits, parity)?;
    SerialPort::open(device, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_port_not_found_error() {
        let result = SerialPort::open_with("/dev/nonexistent_port_12345", &SerialSettings::default());
        match result {
            Err(Error::NoPort(name)) => assert!(name.contains("nonexistent")),
            other => panic!("Expected NoPort error, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_settings_checked_before_device() {
        let err = open_raw("/dev/nonexistent_port_12345", 9600, 9, false, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSettings);

        let err = open_raw("/dev/nonexistent_port_12345", 9600, 8, false, 7).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSettings);
    }

    #[test]
    fn test_port_is_send_and_sync() {
        fn check<T: Send + Sync>() {}
        check::<SerialPort>();
    }

    #[test]
    fn test_common_rates_supported() {
        for baud in [1200, 9600, 19200, 38400, 57600, 115200] {
            assert!(is_supported_baud(baud), "{baud} should be supported");
        }
        assert!(!is_supported_baud(0));
        let rates = supported_baud_rates();
        assert!(rates.windows(2).all(|w| w[0] < w[1]));
    }
}
