//! Background reader for a serial connection.
//!
//! A [`SerialOperator`] owns a [`SerialConnection`] and a dedicated reader
//! thread. Received data is delivered as [`Event`]s over an unbounded Tokio
//! channel, so async code can `recv().await` while the blocking read stays on
//! its own OS thread.

use crate::connection::SerialConnection;
use crate::error::{Error, Result};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Default read buffer size for the reader thread.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Events emitted by the reader thread.
#[derive(Debug)]
pub enum Event {
    /// Bytes received from the device, in arrival order.
    Received(Vec<u8>),
    /// The reader stopped. Carries the error that stopped it, if any; `None`
    /// means the connection was closed deliberately.
    Closed(Option<Error>),
}

/// A serial connection with a running reader thread.
pub struct SerialOperator {
    connection: Arc<SerialConnection>,
    reader: Option<JoinHandle<()>>,
}

impl SerialOperator {
    /// Start reading from `connection` on a new thread.
    pub fn spawn(
        connection: SerialConnection,
        buffer_size: usize,
    ) -> Result<(Self, UnboundedReceiver<Event>)> {
        let connection = Arc::new(connection);
        let (events, receiver) = mpsc::unbounded_channel();

        let reader_connection = Arc::clone(&connection);
        let reader = thread::Builder::new()
            .name(format!("serial-reader:{}", connection.port()))
            .spawn(move || read_loop(reader_connection, events, buffer_size))?;

        info!(port = connection.port(), "serial operator started");
        Ok((
            Self {
                connection,
                reader: Some(reader),
            },
            receiver,
        ))
    }

    pub fn connection(&self) -> &SerialConnection {
        &self.connection
    }

    /// Write all of `data`, looping over partial writes.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.connection.write(rest)?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "serial device accepted no bytes",
                )));
            }
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Close the connection and wait for the reader thread to finish.
    ///
    /// The reader emits [`Event::Closed`] as its last event.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let result = match self.connection.close() {
            Err(Error::PortClosed(_)) => Ok(()),
            other => other,
        };
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!(port = self.connection.port(), "serial reader thread panicked");
            }
        }
        info!(port = self.connection.port(), "serial operator stopped");
        result
    }
}

impl Drop for SerialOperator {
    fn drop(&mut self) {
        if self.reader.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn read_loop(connection: Arc<SerialConnection>, events: UnboundedSender<Event>, buffer_size: usize) {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let error = loop {
        match connection.read(&mut buffer) {
            Ok(n) => {
                if events.send(Event::Received(buffer[..n].to_vec())).is_err() {
                    debug!(port = connection.port(), "event receiver dropped, stopping reader");
                    break None;
                }
            }
            // Interrupted without closing: the caller only wanted to wake us.
            Err(Error::Interrupted) => continue,
            Err(Error::PortClosed(_)) => break None,
            Err(err) => {
                warn!(port = connection.port(), error = %err, "serial read failed");
                break Some(err);
            }
        }
    };
    let _ = events.send(Event::Closed(error));
}
