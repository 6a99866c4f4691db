//! SerialConnection lifecycle tests against a pseudo-terminal.

#![cfg(unix)]

mod common;

use common::{fast_settings, open_pty, read_exactly};
use flow_serial::{Error, ErrorKind, SerialConnection};
use serial_test::serial;
use std::thread;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn test_close_wakes_blocked_reader() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut buf = [0u8; 16];
            connection.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(100));
        connection.close().unwrap();

        let err = reader.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortClosed, "got {err:?}");
    });

    assert!(connection.is_closed());
}

#[test]
#[serial]
fn test_operations_after_close_are_rejected() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();
    connection.close().unwrap();

    let mut buf = [0u8; 4];
    assert!(matches!(connection.read(&mut buf), Err(Error::PortClosed(_))));
    assert!(matches!(connection.write(b"x"), Err(Error::PortClosed(_))));
    assert!(matches!(connection.interrupt(), Err(Error::PortClosed(_))));
    assert!(matches!(connection.close(), Err(Error::PortClosed(_))));

    // The device itself was released.
    let reopened = SerialConnection::open(&pty.device, &fast_settings()).unwrap();
    reopened.close().unwrap();
}

#[test]
#[serial]
fn test_interrupt_without_close_keeps_connection_open() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    connection.interrupt().unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(connection.read(&mut buf), Err(Error::Interrupted)));
    assert!(!connection.is_closed());

    pty.send(b"ok");
    assert_eq!(read_exactly(2, |buf| connection.read(buf)), b"ok");
    connection.close().unwrap();
}

#[test]
#[serial]
fn test_read_timeout_expires_without_data() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    let timeout = Duration::from_millis(150);
    let started = Instant::now();
    let mut buf = [0u8; 8];
    let err = connection.read_timeout(&mut buf, timeout).unwrap_err();
    assert!(matches!(err, Error::TimedOut(t) if t == timeout), "got {err:?}");
    assert!(started.elapsed() >= timeout);

    // A timed-out read leaves no interrupt behind.
    pty.send(b"late");
    assert_eq!(read_exactly(4, |buf| connection.read(buf)), b"late");

    connection.close().unwrap();
}

#[test]
#[serial]
fn test_read_timeout_returns_data_in_time() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    pty.send(b"hi");
    let mut buf = [0u8; 8];
    let n = connection
        .read_timeout(&mut buf, Duration::from_secs(2))
        .unwrap();
    assert!(n > 0);
    assert_eq!(&buf[..n], &b"hi"[..n]);

    connection.close().unwrap();
}

#[test]
#[serial]
fn test_read_timeout_accepts_unbounded_duration() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    pty.send(b"x");
    let mut buf = [0u8; 8];
    assert_eq!(connection.read_timeout(&mut buf, Duration::MAX).unwrap(), 1);
    assert_eq!(buf[0], b'x');

    connection.close().unwrap();
}

#[test]
#[serial]
fn test_read_timeout_keeps_caller_interrupt_armed() {
    let pty = open_pty();
    let connection = SerialConnection::open(&pty.device, &fast_settings()).unwrap();

    // Data is waiting, so the read wins whether or not the zero-length
    // deadline fires first.
    pty.send(b"abc");
    thread::sleep(Duration::from_millis(100));
    connection.interrupt().unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(connection.read_timeout(&mut buf, Duration::ZERO).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");

    let result = connection.read_timeout(&mut buf, Duration::from_secs(2));
    assert!(matches!(result, Err(Error::Interrupted)), "got {result:?}");

    connection.close().unwrap();
}
