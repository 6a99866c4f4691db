//! Shareable serial connection.
//!
//! [`SerialPort`] encodes the "no close while I/O is in flight" rule in the
//! type system, which does not fit callers that keep the port behind an
//! `Arc` and shut it down from a different thread than the reader. A
//! [`SerialConnection`] takes over that bookkeeping at runtime: `close`
//! interrupts a blocked reader, waits for every in-flight operation to leave
//! the port, then releases it. Any later use reports [`Error::PortClosed`].

use crate::error::{Error, Result};
use crate::native::SerialPort;
use crate::settings::{LineConfig, SerialSettings};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A serial port that can be shared between threads and closed from any of them.
pub struct SerialConnection {
    name: String,
    config: LineConfig,
    /// `Some` until closed. Operations hold the read lock for their whole
    /// duration; `close` takes the write lock to wait them out.
    port: RwLock<Option<SerialPort>>,
    closed: AtomicBool,
    /// Set by [`interrupt`](Self::interrupt) until a read reports it.
    caller_interrupt: AtomicBool,
}

impl SerialConnection {
    /// Open `device` with the given settings.
    pub fn open(device: &str, settings: &SerialSettings) -> Result<Self> {
        SerialPort::open_with(device, settings).map(Self::from_port)
    }

    /// Wrap an already open port.
    pub fn from_port(port: SerialPort) -> Self {
        Self {
            name: port.name().to_string(),
            config: *port.config(),
            port: RwLock::new(Some(port)),
            closed: AtomicBool::new(false),
            caller_interrupt: AtomicBool::new(false),
        }
    }

    /// Get the name/path of the underlying port.
    pub fn port(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn with_port<T>(&self, op: impl FnOnce(&SerialPort) -> Result<T>) -> Result<T> {
        if self.is_closed() {
            return Err(Error::port_closed(&self.name));
        }
        let guard = self.port.read();
        match guard.as_ref() {
            Some(port) => op(port),
            None => Err(Error::port_closed(&self.name)),
        }
    }

    /// Block until data arrives; see [`SerialPort::read`].
    ///
    /// A read woken because the connection is being closed reports
    /// [`Error::PortClosed`] rather than [`Error::Interrupted`].
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        match self.with_port(|port| port.read(buffer)) {
            Err(Error::Interrupted) => {
                self.caller_interrupt.store(false, Ordering::Release);
                if self.is_closed() {
                    Err(Error::port_closed(&self.name))
                } else {
                    Err(Error::Interrupted)
                }
            }
            other => other,
        }
    }

    /// Write once; see [`SerialPort::write`].
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.with_port(|port| port.write(data))
    }

    /// Wake a blocked reader without closing the connection.
    pub fn interrupt(&self) -> Result<()> {
        self.with_port(|port| {
            self.caller_interrupt.store(true, Ordering::Release);
            port.interrupt()
        })
    }

    /// Read with a deadline.
    ///
    /// A watchdog thread interrupts the read once `timeout` elapses, in which
    /// case [`Error::TimedOut`] is returned. Data that arrives in time is
    /// returned normally and the watchdog is cancelled. A timeout too large to
    /// represent as a deadline waits without a watchdog.
    ///
    /// If the watchdog fires just as data arrives, its interrupt is withdrawn
    /// again unless an [`interrupt`](Self::interrupt) from the caller is still
    /// outstanding; that one stays armed for the next read.
    pub fn read_timeout(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.read(buffer);
        };
        let done = Mutex::new(false);
        let wake = Condvar::new();
        let fired = AtomicBool::new(false);

        let result = thread::scope(|scope| {
            scope.spawn(|| {
                let mut finished = done.lock();
                while !*finished {
                    if wake.wait_until(&mut finished, deadline).timed_out() {
                        break;
                    }
                }
                if !*finished {
                    fired.store(true, Ordering::Release);
                    if let Err(err) = self.with_port(|port| port.interrupt()) {
                        debug!(port = %self.name, error = %err, "deadline interrupt failed");
                    }
                }
            });

            let result = self.read(buffer);
            *done.lock() = true;
            wake.notify_one();
            result
        });

        let fired = fired.load(Ordering::Acquire);
        match result {
            Err(Error::Interrupted) if fired => Err(Error::TimedOut(timeout)),
            other => {
                if fired && !self.caller_interrupt.load(Ordering::Acquire) {
                    // The watchdog lost the race; don't leak its interrupt
                    // into the next read.
                    let _ = self.with_port(|port| {
                        port.clear_interrupt();
                        Ok(())
                    });
                }
                other
            }
        }
    }

    /// Close the connection.
    ///
    /// Interrupts a blocked reader, waits for in-flight reads and writes to
    /// return, then releases the port. A second call returns
    /// [`Error::PortClosed`]. A write blocked on a stalled device delays
    /// closing until it completes.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::port_closed(&self.name));
        }

        if let Some(port) = self.port.read().as_ref() {
            if let Err(err) = port.interrupt() {
                warn!(port = %self.name, error = %err, "failed to interrupt reader while closing");
            }
        }

        let port = self.port.write().take();
        debug!(port = %self.name, "connection closed");
        match port {
            Some(port) => port.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_open_missing_device() {
        let err = SerialConnection::open("/dev/nonexistent_port_12345", &SerialSettings::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPort);
    }

    #[test]
    fn test_connection_is_shareable() {
        fn check<T: Send + Sync>() {}
        check::<SerialConnection>();
    }
}
