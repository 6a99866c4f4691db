//! POSIX backend.
//!
//! Line settings are programmed through termios, exclusive ownership is taken
//! with `flock(2)`, and reads `poll(2)` the device together with the read end
//! of a self-pipe so that `interrupt` can wake them without touching the
//! device descriptor.

use crate::debug::diagnostic;
use crate::error::{Error, Result};
use crate::settings::{CharacterSize, LineConfig, Parity};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// Rates every POSIX termios implementation knows about.
const STANDARD_SPEEDS: &[(u32, libc::speed_t)] = &[
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
];

#[cfg(any(target_os = "linux", target_os = "android"))]
const EXTENDED_SPEEDS: &[(u32, libc::speed_t)] = &[
    (460800, libc::B460800),
    (500000, libc::B500000),
    (576000, libc::B576000),
    (921600, libc::B921600),
    (1000000, libc::B1000000),
    (1152000, libc::B1152000),
    (1500000, libc::B1500000),
    (2000000, libc::B2000000),
    (2500000, libc::B2500000),
    (3000000, libc::B3000000),
    (3500000, libc::B3500000),
    (4000000, libc::B4000000),
];

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const EXTENDED_SPEEDS: &[(u32, libc::speed_t)] = &[];

fn speed_for(baud: u32) -> Option<libc::speed_t> {
    STANDARD_SPEEDS
        .iter()
        .chain(EXTENDED_SPEEDS)
        .find(|(rate, _)| *rate == baud)
        .map(|(_, speed)| *speed)
}

pub(crate) fn is_supported_baud(baud: u32) -> bool {
    speed_for(baud).is_some()
}

pub(crate) fn supported_baud_rates() -> Vec<u32> {
    STANDARD_SPEEDS
        .iter()
        .chain(EXTENDED_SPEEDS)
        .map(|(rate, _)| *rate)
        .collect()
}

/// Build raw-mode terminal attributes for `config`.
///
/// Runs before the device is opened, so a rejected configuration never
/// allocates a descriptor.
fn termios_for(config: &LineConfig) -> Result<libc::termios> {
    let speed = speed_for(config.baud()).ok_or_else(|| {
        Error::invalid_settings(format!("baud rate {} is not supported", config.baud()))
    })?;

    // SAFETY: termios is a plain C struct for which all-zero is a valid value.
    let mut tio: libc::termios = unsafe { mem::zeroed() };
    tio.c_iflag = 0;
    tio.c_oflag = 0;
    tio.c_lflag = 0;
    tio.c_cflag = libc::CREAD | libc::CLOCAL;
    tio.c_cflag |= match config.character_size() {
        CharacterSize::Five => libc::CS5,
        CharacterSize::Six => libc::CS6,
        CharacterSize::Seven => libc::CS7,
        CharacterSize::Eight => libc::CS8,
    };
    if config.two_stop_bits() {
        tio.c_cflag |= libc::CSTOPB;
    }
    match config.parity() {
        Parity::None => {}
        Parity::Odd => tio.c_cflag |= libc::PARENB | libc::PARODD,
        Parity::Even => tio.c_cflag |= libc::PARENB,
    }
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `tio` is a valid, exclusively borrowed termios.
    let rc = unsafe {
        libc::cfsetispeed(&mut tio, speed) | libc::cfsetospeed(&mut tio, speed)
    };
    if rc < 0 {
        return Err(Error::invalid_settings(format!(
            "baud rate {} rejected by termios",
            config.baud()
        )));
    }
    Ok(tio)
}

/// Capture `errno` for a failed call, emitting a diagnostic when enabled.
fn last_error(call: &'static str, device: &str) -> io::Error {
    let err = io::Error::last_os_error();
    diagnostic!(device, call, error = %err, "serial port call failed");
    err
}

fn hung_up(device: &str) -> Error {
    diagnostic!(device, "serial device reported hang-up or error condition");
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("serial device {device} hung up"),
    ))
}

/// Mark a pipe end non-blocking and close-on-exec.
fn configure_pipe_end(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no pointers involved.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn wake_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    configure_pipe_end(rx.as_raw_fd())?;
    configure_pipe_end(tx.as_raw_fd())?;
    Ok((rx, tx))
}

/// Classify a failed `open(2)`.
fn open_error(err: io::Error, device: &str) -> Error {
    match err.raw_os_error() {
        Some(libc::ENOENT | libc::ENODEV | libc::ENXIO | libc::ENOTDIR) => Error::no_port(device),
        Some(libc::EACCES | libc::EPERM | libc::EROFS) => Error::access_denied(device),
        Some(libc::EBUSY) => Error::busy(device),
        _ => Error::Io(err),
    }
}

/// Classify a failed `flock(2)`; a lock held elsewhere means busy.
fn lock_error(err: io::Error, device: &str) -> Error {
    match err.raw_os_error() {
        Some(libc::EWOULDBLOCK) => Error::busy(device),
        _ => Error::Io(err),
    }
}

/// Classify a failed `tcsetattr(3)`.
fn configure_error(err: io::Error, config: &LineConfig, device: &str) -> Error {
    match err.raw_os_error() {
        Some(libc::EINVAL) => Error::invalid_settings(format!("{config} rejected by {device}")),
        _ => Error::Io(err),
    }
}

/// An open terminal device plus its interrupt pipe.
///
/// Every descriptor is an [`OwnedFd`], so an early return anywhere in
/// [`open`] releases whatever was acquired so far.
#[derive(Debug)]
pub(crate) struct RawPort {
    fd: OwnedFd,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
    /// Set while an interrupt is waiting to be consumed by a read.
    pending: AtomicBool,
}

pub(crate) fn open(device: &str, config: &LineConfig) -> Result<RawPort> {
    let termios = termios_for(config)?;

    if device.is_empty() {
        return Err(Error::no_port(device));
    }
    let path = CString::new(device).map_err(|_| Error::no_port(device))?;

    // SAFETY: `path` is a valid NUL-terminated string.
    let raw = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if raw < 0 {
        return Err(open_error(last_error("open", device), device));
    }
    // SAFETY: `raw` is a freshly opened descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: plain syscall on an owned descriptor.
    if unsafe { libc::flock(fd.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
        return Err(lock_error(last_error("flock", device), device));
    }

    // SAFETY: termios is plain data; tcgetattr fills it in on success.
    let mut current: libc::termios = unsafe { mem::zeroed() };
    if unsafe { libc::tcgetattr(fd.as_raw_fd(), &mut current) } < 0 {
        return Err(Error::Io(last_error("tcgetattr", device)));
    }
    if unsafe { libc::tcflush(fd.as_raw_fd(), libc::TCIOFLUSH) } < 0 {
        return Err(Error::Io(last_error("tcflush", device)));
    }
    if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &termios) } < 0 {
        return Err(configure_error(last_error("tcsetattr", device), config, device));
    }

    let (wake_rx, wake_tx) = wake_pipe().map_err(|err| {
        diagnostic!(device, error = %err, "failed to create interrupt pipe");
        Error::Io(err)
    })?;

    Ok(RawPort {
        fd,
        wake_rx,
        wake_tx,
        pending: AtomicBool::new(false),
    })
}

impl RawPort {
    pub(crate) fn read(&self, buffer: &mut [u8], device: &str) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        loop {
            let mut polls = [
                libc::pollfd {
                    fd: self.fd.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wake_rx.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: `polls` is a valid array of two pollfd entries.
            if unsafe { libc::poll(polls.as_mut_ptr(), 2, -1) } < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                diagnostic!(device, call = "poll", error = %err, "serial port call failed");
                return Err(Error::Io(err));
            }

            let port_events = polls[0].revents;
            // Data wins over a pending interrupt.
            if port_events & libc::POLLIN != 0 {
                // SAFETY: `buffer` is valid for writes of `buffer.len()` bytes.
                let n = unsafe {
                    libc::read(
                        self.fd.as_raw_fd(),
                        buffer.as_mut_ptr().cast(),
                        buffer.len(),
                    )
                };
                if n > 0 {
                    return Ok(n as usize);
                }
                if n == 0 {
                    return Err(hung_up(device));
                }
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => continue,
                    _ => {
                        diagnostic!(device, call = "read", error = %err, "serial port call failed");
                        return Err(Error::Io(err));
                    }
                }
            }
            if port_events & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(hung_up(device));
            }

            if polls[1].revents & libc::POLLIN != 0 {
                self.drain_wake();
                if self.pending.swap(false, Ordering::AcqRel) {
                    return Err(Error::Interrupted);
                }
                // A concurrent reader already consumed it; keep waiting.
            }
        }
    }

    pub(crate) fn write(&self, data: &[u8], device: &str) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        loop {
            // SAFETY: `data` is valid for reads of `data.len()` bytes.
            let n = unsafe { libc::write(self.fd.as_raw_fd(), data.as_ptr().cast(), data.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => self.wait_writable(device)?,
                _ => {
                    diagnostic!(device, call = "write", error = %err, "serial port call failed");
                    return Err(Error::Io(err));
                }
            }
        }
    }

    fn wait_writable(&self, device: &str) -> Result<()> {
        let mut poll = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        loop {
            // SAFETY: `poll` is a single valid pollfd.
            if unsafe { libc::poll(&mut poll, 1, -1) } < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                diagnostic!(device, call = "poll", error = %err, "serial port call failed");
                return Err(Error::Io(err));
            }
            if poll.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(hung_up(device));
            }
            return Ok(());
        }
    }

    pub(crate) fn interrupt(&self, device: &str) -> Result<()> {
        // Already armed: the queued wakeup covers this call too.
        if self.pending.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let token = [1u8];
        loop {
            // SAFETY: `token` is a valid one-byte buffer.
            let n = unsafe { libc::write(self.wake_tx.as_raw_fd(), token.as_ptr().cast(), 1) };
            if n == 1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // A full pipe already holds a wakeup.
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => {
                    self.pending.store(false, Ordering::Release);
                    diagnostic!(device, call = "write", error = %err, "failed to signal interrupt pipe");
                    return Err(Error::Io(err));
                }
            }
        }
    }

    /// Discard every queued wakeup token.
    fn drain_wake(&self) {
        let mut scratch = [0u8; 64];
        loop {
            // SAFETY: `scratch` is valid for writes of its full length.
            let n = unsafe {
                libc::read(
                    self.wake_rx.as_raw_fd(),
                    scratch.as_mut_ptr().cast(),
                    scratch.len(),
                )
            };
            if n > 0 {
                continue;
            }
            if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
    }

    /// Withdraw an armed interrupt that no read has consumed yet.
    pub(crate) fn clear_interrupt(&self) {
        self.drain_wake();
        self.pending.store(false, Ordering::Release);
    }

    /// Release the device and the interrupt pipe.
    ///
    /// All three descriptors are closed even if an earlier one fails; the
    /// first failure is reported.
    pub(crate) fn close(self, device: &str) -> Result<()> {
        let RawPort {
            fd,
            wake_rx,
            wake_tx,
            ..
        } = self;

        let mut first_error = None;
        for (call, owned) in [("close", fd), ("close wake_rx", wake_rx), ("close wake_tx", wake_tx)] {
            // SAFETY: ownership is transferred out of the OwnedFd, so this is
            // the only close the descriptor will ever see.
            if unsafe { libc::close(owned.into_raw_fd()) } < 0 {
                let err = last_error(call, device);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(Error::Io(err)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn config(bits: CharacterSize, two_stop_bits: bool, parity: Parity) -> LineConfig {
        LineConfig::new(9600, bits, two_stop_bits, parity).unwrap()
    }

    #[test]
    fn test_speed_table() {
        assert_eq!(speed_for(9600), Some(libc::B9600));
        assert_eq!(speed_for(115200), Some(libc::B115200));
        assert_eq!(speed_for(9601), None);
        assert!(supported_baud_rates().contains(&230400));
    }

    #[test]
    fn test_termios_framing() {
        let tio = termios_for(&config(CharacterSize::Seven, true, Parity::Odd)).unwrap();
        assert_eq!(tio.c_cflag & libc::CSIZE, libc::CS7);
        assert_ne!(tio.c_cflag & libc::CSTOPB, 0);
        assert_ne!(tio.c_cflag & libc::PARENB, 0);
        assert_ne!(tio.c_cflag & libc::PARODD, 0);
        assert_eq!(tio.c_lflag, 0);
        assert_eq!(tio.c_cc[libc::VMIN], 1);

        let tio = termios_for(&config(CharacterSize::Eight, false, Parity::Even)).unwrap();
        assert_eq!(tio.c_cflag & libc::CSIZE, libc::CS8);
        assert_eq!(tio.c_cflag & libc::CSTOPB, 0);
        assert_ne!(tio.c_cflag & libc::PARENB, 0);
        assert_eq!(tio.c_cflag & libc::PARODD, 0);
    }

    #[test]
    fn test_open_errno_mapping() {
        let cases = [
            (libc::ENOENT, ErrorKind::NoPort),
            (libc::ENODEV, ErrorKind::NoPort),
            (libc::ENXIO, ErrorKind::NoPort),
            (libc::ENOTDIR, ErrorKind::NoPort),
            (libc::EACCES, ErrorKind::AccessDenied),
            (libc::EPERM, ErrorKind::AccessDenied),
            (libc::EROFS, ErrorKind::AccessDenied),
            (libc::EBUSY, ErrorKind::Busy),
            (libc::EIO, ErrorKind::Io),
            (libc::EMFILE, ErrorKind::Io),
        ];
        for (code, kind) in cases {
            let err = open_error(io::Error::from_raw_os_error(code), "/dev/ttyS0");
            assert_eq!(err.kind(), kind, "errno {code}");
        }
    }

    #[test]
    fn test_lock_and_configure_errno_mapping() {
        let busy = lock_error(io::Error::from_raw_os_error(libc::EWOULDBLOCK), "/dev/ttyS0");
        assert_eq!(busy.kind(), ErrorKind::Busy);
        let other = lock_error(io::Error::from_raw_os_error(libc::EBADF), "/dev/ttyS0");
        assert_eq!(other.kind(), ErrorKind::Io);

        let line = config(CharacterSize::Eight, false, Parity::None);
        let rejected = configure_error(io::Error::from_raw_os_error(libc::EINVAL), &line, "/dev/ttyS0");
        assert_eq!(rejected.kind(), ErrorKind::InvalidSettings);
        let failed = configure_error(io::Error::from_raw_os_error(libc::EIO), &line, "/dev/ttyS0");
        assert_eq!(failed.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_open_missing_device() {
        let err = open("/dev/nonexistent_port_12345", &config(CharacterSize::Eight, false, Parity::None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPort);
    }

    #[test]
    fn test_open_empty_name() {
        let err = open("", &config(CharacterSize::Eight, false, Parity::None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoPort);
    }

    #[test]
    fn test_open_non_terminal_is_io() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        let err = open(path, &config(CharacterSize::Eight, false, Parity::None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
