//! Win32 backend.
//!
//! The device is opened for overlapped I/O. A read waits on its own
//! completion event together with an auto-reset interrupt event; when the
//! interrupt wins, the pending read is cancelled and any bytes that still
//! made it into the buffer are reported.

use crate::debug::diagnostic;
use crate::error::{Error, Result};
use crate::settings::{LineConfig, Parity};
use std::ffi::OsStr;
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::winerror::{
    ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_INVALID_NAME, ERROR_INVALID_PARAMETER,
    ERROR_IO_PENDING, ERROR_PATH_NOT_FOUND, ERROR_SHARING_VIOLATION,
};
use winapi::um::commapi::{GetCommState, PurgeComm, SetCommState, SetCommTimeouts};
use winapi::um::fileapi::{CreateFileW, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{CancelIo, GetOverlappedResult};
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::{CreateEventW, SetEvent, WaitForMultipleObjects};
use winapi::um::winbase::{
    COMMTIMEOUTS, DCB, DTR_CONTROL_ENABLE, EVENPARITY, FILE_FLAG_OVERLAPPED, INFINITE, NOPARITY,
    ODDPARITY, ONESTOPBIT, PURGE_RXABORT, PURGE_RXCLEAR, PURGE_TXABORT, PURGE_TXCLEAR,
    RTS_CONTROL_ENABLE, TWOSTOPBITS, WAIT_OBJECT_0,
};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE, MAXDWORD};

const SUPPORTED_BAUDS: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 128000, 230400,
    256000, 460800, 921600,
];

pub(crate) fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUDS.contains(&baud)
}

pub(crate) fn supported_baud_rates() -> Vec<u32> {
    SUPPORTED_BAUDS.to_vec()
}

/// A kernel handle closed on drop.
#[derive(Debug)]
struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and may be used from any thread.
unsafe impl Send for OwnedHandle {}
// SAFETY: every operation performed through a shared reference is a
// thread-safe Win32 call.
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn into_raw(self) -> HANDLE {
        let handle = self.0;
        mem::forget(self);
        handle
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle is owned and closed exactly once here.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn event(manual_reset: bool) -> io::Result<OwnedHandle> {
    let reset = if manual_reset { TRUE } else { FALSE };
    // SAFETY: null security attributes and name are allowed.
    let handle = unsafe { CreateEventW(ptr::null_mut(), reset, FALSE, ptr::null()) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(OwnedHandle(handle))
}

fn last_error(call: &'static str, device: &str) -> io::Error {
    let err = io::Error::last_os_error();
    diagnostic!(device, call, error = %err, "serial port call failed");
    err
}

fn os_code(err: &io::Error) -> Option<DWORD> {
    err.raw_os_error().map(|code| code as DWORD)
}

/// `COM10` and above are only reachable through the device namespace.
fn device_path(device: &str) -> Vec<u16> {
    let path = if device.starts_with(r"\\") {
        device.to_string()
    } else {
        format!(r"\\.\{device}")
    };
    OsStr::new(&path).encode_wide().chain(Some(0)).collect()
}

/// Classify a failed `CreateFileW`.
fn open_error(err: io::Error, device: &str) -> Error {
    match os_code(&err) {
        Some(ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND | ERROR_INVALID_NAME) => {
            Error::no_port(device)
        }
        // Windows reports a COM port held by another process as access denied.
        Some(ERROR_ACCESS_DENIED | ERROR_SHARING_VIOLATION) => Error::busy(device),
        _ => Error::Io(err),
    }
}

/// Classify a failed `SetCommState`.
fn configure_error(err: io::Error, config: &LineConfig, device: &str) -> Error {
    match os_code(&err) {
        Some(ERROR_INVALID_PARAMETER) => {
            Error::invalid_settings(format!("{config} rejected by {device}"))
        }
        _ => Error::Io(err),
    }
}

#[derive(Debug)]
pub(crate) struct RawPort {
    handle: OwnedHandle,
    interrupt: OwnedHandle,
    /// Set while an interrupt is waiting to be consumed by a read.
    pending: AtomicBool,
}

pub(crate) fn open(device: &str, config: &LineConfig) -> Result<RawPort> {
    if !is_supported_baud(config.baud()) {
        return Err(Error::invalid_settings(format!(
            "baud rate {} is not supported",
            config.baud()
        )));
    }
    if device.is_empty() {
        return Err(Error::no_port(device));
    }

    let path = device_path(device);
    // SAFETY: `path` is NUL-terminated and outlives the call.
    let raw = unsafe {
        CreateFileW(
            path.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            0,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };
    if raw == INVALID_HANDLE_VALUE {
        return Err(open_error(last_error("CreateFileW", device), device));
    }
    let handle = OwnedHandle(raw);

    // SAFETY: DCB is plain data; GetCommState fills it in.
    let mut dcb: DCB = unsafe { mem::zeroed() };
    dcb.DCBlength = mem::size_of::<DCB>() as DWORD;
    if unsafe { GetCommState(handle.0, &mut dcb) } == 0 {
        return Err(Error::Io(last_error("GetCommState", device)));
    }
    dcb.BaudRate = config.baud();
    dcb.ByteSize = config.character_size().bits();
    dcb.StopBits = if config.two_stop_bits() { TWOSTOPBITS } else { ONESTOPBIT };
    dcb.Parity = match config.parity() {
        Parity::None => NOPARITY,
        Parity::Odd => ODDPARITY,
        Parity::Even => EVENPARITY,
    };
    dcb.set_fBinary(1);
    dcb.set_fParity(u32::from(config.parity() != Parity::None));
    dcb.set_fOutxCtsFlow(0);
    dcb.set_fOutxDsrFlow(0);
    dcb.set_fDtrControl(DTR_CONTROL_ENABLE);
    dcb.set_fDsrSensitivity(0);
    dcb.set_fOutX(0);
    dcb.set_fInX(0);
    dcb.set_fNull(0);
    dcb.set_fRtsControl(RTS_CONTROL_ENABLE);
    dcb.set_fAbortOnError(0);

    let purge = PURGE_RXABORT | PURGE_RXCLEAR | PURGE_TXABORT | PURGE_TXCLEAR;
    if unsafe { PurgeComm(handle.0, purge) } == 0 {
        return Err(Error::Io(last_error("PurgeComm", device)));
    }
    if unsafe { SetCommState(handle.0, &mut dcb) } == 0 {
        return Err(configure_error(last_error("SetCommState", device), config, device));
    }

    // Return as soon as any byte is available; otherwise wait (practically)
    // forever. Interruption is handled by the event, not by timeouts.
    let mut timeouts = COMMTIMEOUTS {
        ReadIntervalTimeout: MAXDWORD,
        ReadTotalTimeoutMultiplier: MAXDWORD,
        ReadTotalTimeoutConstant: MAXDWORD - 1,
        WriteTotalTimeoutMultiplier: 0,
        WriteTotalTimeoutConstant: 0,
    };
    if unsafe { SetCommTimeouts(handle.0, &mut timeouts) } == 0 {
        return Err(Error::Io(last_error("SetCommTimeouts", device)));
    }

    let interrupt = event(false).map_err(|err| {
        diagnostic!(device, error = %err, "failed to create interrupt event");
        Error::Io(err)
    })?;

    Ok(RawPort {
        handle,
        interrupt,
        pending: AtomicBool::new(false),
    })
}

impl RawPort {
    pub(crate) fn read(&self, buffer: &mut [u8], device: &str) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let len = buffer.len().min(MAXDWORD as usize) as DWORD;

        loop {
            let completion = event(true).map_err(Error::Io)?;
            // SAFETY: OVERLAPPED is plain data; zeroed is its documented initial state.
            let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
            overlapped.hEvent = completion.0;
            let mut transferred: DWORD = 0;

            // SAFETY: `buffer` and `overlapped` stay alive until the operation
            // has completed or been cancelled and reaped below.
            let started = unsafe {
                ReadFile(
                    self.handle.0,
                    buffer.as_mut_ptr().cast(),
                    len,
                    &mut transferred,
                    &mut overlapped,
                )
            };
            if started == 0 {
                let err = io::Error::last_os_error();
                if os_code(&err) != Some(ERROR_IO_PENDING) {
                    diagnostic!(device, call = "ReadFile", error = %err, "serial port call failed");
                    return Err(Error::Io(err));
                }
            } else if transferred > 0 {
                return Ok(transferred as usize);
            } else {
                continue;
            }

            let waits = [completion.0, self.interrupt.0];
            // SAFETY: both handles are valid for the duration of the wait.
            let signaled = unsafe { WaitForMultipleObjects(2, waits.as_ptr(), FALSE, INFINITE) };

            if signaled == WAIT_OBJECT_0 {
                if unsafe { GetOverlappedResult(self.handle.0, &mut overlapped, &mut transferred, FALSE) } == 0 {
                    return Err(Error::Io(last_error("GetOverlappedResult", device)));
                }
                if transferred > 0 {
                    return Ok(transferred as usize);
                }
                // Total timeout elapsed without data.
                continue;
            }

            if signaled == WAIT_OBJECT_0 + 1 {
                // SAFETY: cancels only I/O issued by this thread on this handle,
                // then blocks until the kernel is done with `buffer`.
                unsafe {
                    CancelIo(self.handle.0);
                    GetOverlappedResult(self.handle.0, &mut overlapped, &mut transferred, TRUE);
                }
                if transferred > 0 {
                    // Bytes arrived before the cancel landed; keep the interrupt armed.
                    unsafe {
                        SetEvent(self.interrupt.0);
                    }
                    return Ok(transferred as usize);
                }
                if self.pending.swap(false, Ordering::AcqRel) {
                    return Err(Error::Interrupted);
                }
                continue;
            }

            let err = last_error("WaitForMultipleObjects", device);
            unsafe {
                CancelIo(self.handle.0);
                GetOverlappedResult(self.handle.0, &mut overlapped, &mut transferred, TRUE);
            }
            return Err(Error::Io(err));
        }
    }

    pub(crate) fn write(&self, data: &[u8], device: &str) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len().min(MAXDWORD as usize) as DWORD;

        let completion = event(true).map_err(Error::Io)?;
        // SAFETY: OVERLAPPED is plain data; zeroed is its documented initial state.
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = completion.0;
        let mut written: DWORD = 0;

        // SAFETY: `data` and `overlapped` outlive the operation, which is
        // reaped with a blocking GetOverlappedResult.
        let done = unsafe {
            WriteFile(
                self.handle.0,
                data.as_ptr().cast(),
                len,
                &mut written,
                &mut overlapped,
            )
        };
        if done == 0 {
            let err = io::Error::last_os_error();
            if os_code(&err) != Some(ERROR_IO_PENDING) {
                diagnostic!(device, call = "WriteFile", error = %err, "serial port call failed");
                return Err(Error::Io(err));
            }
            if unsafe { GetOverlappedResult(self.handle.0, &mut overlapped, &mut written, TRUE) } == 0 {
                return Err(Error::Io(last_error("GetOverlappedResult", device)));
            }
        }
        Ok(written as usize)
    }

    pub(crate) fn interrupt(&self, device: &str) -> Result<()> {
        self.pending.store(true, Ordering::Release);
        // SAFETY: the event handle is valid while `self` lives.
        if unsafe { SetEvent(self.interrupt.0) } == 0 {
            return Err(Error::Io(last_error("SetEvent", device)));
        }
        Ok(())
    }

    /// Withdraw an armed interrupt that no read has consumed yet.
    pub(crate) fn clear_interrupt(&self) {
        self.pending.store(false, Ordering::Release);
        // SAFETY: zero-timeout wait just resets the auto-reset event if set.
        unsafe {
            winapi::um::synchapi::WaitForSingleObject(self.interrupt.0, 0);
        }
    }

    /// Release the device and the interrupt event.
    pub(crate) fn close(self, device: &str) -> Result<()> {
        let RawPort {
            handle, interrupt, ..
        } = self;

        let mut first_error = None;
        for (call, owned) in [("CloseHandle", handle), ("CloseHandle interrupt", interrupt)] {
            // SAFETY: ownership leaves the wrapper, so this is the only close.
            if unsafe { CloseHandle(owned.into_raw()) } == 0 {
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
