//! Shared test utilities for flow-serial tests.
//!
//! Unix tests drive the native layer through a pseudo-terminal pair: the
//! slave end is opened as the serial device while the test talks to the
//! master end as if it were the remote peer.

#![allow(dead_code)]

use flow_serial::SerialSettings;
use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::FromRawFd;
use std::time::{Duration, Instant};

/// Both ends of a pseudo-terminal.
pub struct PtyPair {
    /// The peer side; bytes written here arrive at the device.
    pub master: File,
    /// Path of the slave device, e.g. `/dev/pts/3`.
    pub device: String,
}

impl PtyPair {
    /// Send `data` to whoever has the device open.
    pub fn send(&self, data: &[u8]) {
        (&self.master).write_all(data).expect("write to pty master");
    }

    /// Receive exactly `len` bytes written to the device.
    pub fn receive(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        (&self.master).read_exact(&mut buf).expect("read from pty master");
        buf
    }
}

/// Allocate a new pseudo-terminal pair.
pub fn open_pty() -> PtyPair {
    // SAFETY: plain libc calls on a descriptor this function owns.
    unsafe {
        let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
        assert!(fd >= 0, "posix_openpt: {}", io::Error::last_os_error());
        let master = File::from_raw_fd(fd);
        assert_eq!(libc::grantpt(fd), 0, "grantpt: {}", io::Error::last_os_error());
        assert_eq!(libc::unlockpt(fd), 0, "unlockpt: {}", io::Error::last_os_error());
        PtyPair {
            device: slave_name(fd),
            master,
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn slave_name(fd: libc::c_int) -> String {
    let mut buf = [0 as libc::c_char; 128];
    assert_eq!(
        libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()),
        0,
        "ptsname_r: {}",
        io::Error::last_os_error()
    );
    CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn slave_name(fd: libc::c_int) -> String {
    let name = libc::ptsname(fd);
    assert!(!name.is_null(), "ptsname: {}", io::Error::last_os_error());
    CStr::from_ptr(name).to_string_lossy().into_owned()
}

/// 115200 8N1.
pub fn fast_settings() -> SerialSettings {
    SerialSettings::with_baud(115200)
}

/// Call `read` until `len` bytes have been collected.
pub fn read_exactly<E: std::fmt::Debug>(
    len: usize,
    mut read: impl FnMut(&mut [u8]) -> Result<usize, E>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 256];
    while out.len() < len {
        let want = (len - out.len()).min(buf.len());
        let n = read(&mut buf[..want]).expect("read from device");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
