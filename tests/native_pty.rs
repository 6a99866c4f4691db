//! Native port tests against a pseudo-terminal.
//!
//! The pty slave behaves like a serial device for everything the native layer
//! does (termios, exclusive lock, poll), so these run without hardware.

#![cfg(unix)]

mod common;

use common::{fast_settings, open_pty, read_exactly};
use flow_serial::{open_raw, Error, ErrorKind, Parity, SerialPort, SerialSettings};
use serial_test::serial;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_open_close_every_line_setting() {
    let pty = open_pty();
    for baud in [1200, 9600, 115200] {
        for character_size in 5..=8u8 {
            for two_stop_bits in [false, true] {
                for parity in [Parity::None, Parity::Odd, Parity::Even] {
                    let settings = SerialSettings {
                        baud,
                        character_size,
                        two_stop_bits,
                        parity,
                    };
                    let port = SerialPort::open_with(&pty.device, &settings)
                        .unwrap_or_else(|e| panic!("open with {settings:?} failed: {e}"));
                    assert_eq!(port.config().baud(), baud);
                    assert_eq!(port.config().character_size().bits(), character_size);
                    port.close().unwrap();
                }
            }
        }
    }
}

#[test]
#[serial]
fn test_second_open_is_busy_until_close() {
    let pty = open_pty();
    let first = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    let err = SerialPort::open_with(&pty.device, &fast_settings()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);

    first.close().unwrap();
    let again = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();
    again.close().unwrap();
}

#[test]
#[serial]
fn test_invalid_settings_reported_before_device_is_touched() {
    let pty = open_pty();
    let err = open_raw(&pty.device, 9600, 9, false, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSettings);

    // The device was never opened, so it is still free.
    let port = open_raw(&pty.device, 9600, 8, false, 0).unwrap();
    port.close().unwrap();
}

#[test]
#[serial]
fn test_write_reaches_peer() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    let n = port.write(b"AT\r\n").unwrap();
    assert!(n > 0);
    assert_eq!(pty.receive(n), &b"AT\r\n"[..n]);
    assert_eq!(port.write(&[]).unwrap(), 0);

    port.close().unwrap();
}

#[test]
#[serial]
fn test_read_returns_peer_data() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    pty.send(b"OK\r\n");
    let data = read_exactly(4, |buf| port.read(buf));
    assert_eq!(data, b"OK\r\n");

    let mut empty = [0u8; 0];
    assert_eq!(port.read(&mut empty).unwrap(), 0);

    port.close().unwrap();
}

#[test]
#[serial]
fn test_interrupt_wakes_blocked_read_and_port_stays_usable() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut buf = [0u8; 16];
            port.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(100));
        port.interrupt().unwrap();

        let result = reader.join().unwrap();
        assert!(matches!(result, Err(Error::Interrupted)), "got {result:?}");
    });

    pty.send(b"ping");
    assert_eq!(read_exactly(4, |buf| port.read(buf)), b"ping");
    port.close().unwrap();
}

#[test]
#[serial]
fn test_interrupt_before_read_is_armed_and_coalesced() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    port.interrupt().unwrap();
    port.interrupt().unwrap();
    port.interrupt().unwrap();

    let mut buf = [0u8; 16];
    assert!(port.read(&mut buf).unwrap_err().is_interrupt());

    // Three interrupts count as one: the next read waits for data.
    pty.send(b"x");
    assert_eq!(port.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'x');

    port.close().unwrap();
}

#[test]
#[serial]
fn test_waiting_data_wins_over_pending_interrupt() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    pty.send(b"abc");
    thread::sleep(Duration::from_millis(100));
    port.interrupt().unwrap();

    let mut buf = [0u8; 16];
    assert_eq!(port.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"abc");
    assert!(matches!(port.read(&mut buf), Err(Error::Interrupted)));

    port.close().unwrap();
}

#[test]
#[serial]
fn test_concurrent_read_and_write_preserve_order() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();
    let outbound: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let inbound: Vec<u8> = (0..2048u32).map(|i| (i % 241) as u8).collect();

    thread::scope(|s| {
        let reader = s.spawn(|| read_exactly(inbound.len(), |buf| port.read(buf)));
        let writer = s.spawn(|| {
            let mut rest = &outbound[..];
            while !rest.is_empty() {
                let n = port.write(rest).unwrap();
                rest = &rest[n..];
            }
        });
        let peer_reader = s.spawn(|| pty.receive(outbound.len()));

        for chunk in inbound.chunks(128) {
            pty.send(chunk);
        }

        writer.join().unwrap();
        assert_eq!(peer_reader.join().unwrap(), outbound);
        assert_eq!(reader.join().unwrap(), inbound);
    });

    port.close().unwrap();
}

#[test]
#[serial]
fn test_peer_hang_up_fails_read_with_io() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut buf = [0u8; 16];
            port.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(100));
        drop(pty);

        let err = reader.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io, "got {err:?}");
    });

    // The handle is still released cleanly.
    let _ = port.close();
}

#[test]
#[serial]
fn test_reader_and_interrupter_race() {
    let pty = open_pty();
    let port = SerialPort::open_with(&pty.device, &fast_settings()).unwrap();

    for _ in 0..50 {
        thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut buf = [0u8; 4];
                port.read(&mut buf)
            });
            port.interrupt().unwrap();
            assert!(reader.join().unwrap().unwrap_err().is_interrupt());
        });
    }

    // Nothing left armed after the loop.
    pty.send(b"z");
    let mut buf = [0u8; 4];
    assert_eq!(port.read(&mut buf).unwrap(), 1);

    port.close().unwrap();
}
