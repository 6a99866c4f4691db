//! Flow Serial Library
//!
//! Native serial port access with blocking reads that another thread can
//! interrupt in place, and a handle lifecycle that never leaks or double-closes
//! an OS descriptor.
//!
//! # Modules
//!
//! - `native`: the port handle (`open`, `read`, `write`, `interrupt`, `close`)
//! - `settings`: line configuration and its validation
//! - `error`: the shared error taxonomy
//! - `debug`: process-wide diagnostic toggle
//! - `connection`: shareable connection that can be closed while in use
//! - `operator`: connection plus a background reader thread
//! - `config`: configuration management with TOML support
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use flow_serial::{SerialPort, SerialSettings, Error};
//! use std::thread;
//!
//! let port = SerialPort::open_with("/dev/ttyUSB0", &SerialSettings::with_baud(115200))?;
//! thread::scope(|s| {
//!     let reader = s.spawn(|| {
//!         let mut buf = [0u8; 256];
//!         loop {
//!             match port.read(&mut buf) {
//!                 Ok(n) => println!("{:?}", &buf[..n]),
//!                 Err(Error::Interrupted) => break,
//!                 Err(e) => return Err(e),
//!             }
//!         }
//!         Ok(())
//!     });
//!     port.write(b"hello")?;
//!     port.interrupt()?;
//!     reader.join().expect("reader panicked")
//! })?;
//! port.close()?;
//! # Ok::<(), Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod debug;
pub mod error;
pub mod logging;
pub mod native;
pub mod operator;
pub mod settings;

#[cfg(test)]
mod test_util;

// Re-export commonly used types for convenience
pub use connection::SerialConnection;
pub use debug::{debug_enabled, set_debug};
pub use error::{Error, ErrorKind, Result};
pub use native::{is_supported_baud, open_raw, supported_baud_rates, SerialPort};
pub use operator::{Event, SerialOperator};
pub use settings::{CharacterSize, LineConfig, Parity, SerialSettings};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
