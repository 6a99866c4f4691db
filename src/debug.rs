//! Process-wide diagnostic toggle.
//!
//! When enabled, failures inside the native layer emit a `tracing` warning
//! naming the OS call and OS error that caused them. The flag never affects
//! control flow.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enable or disable diagnostic output on failures.
pub fn set_debug(value: bool) {
    DEBUG.store(value, Ordering::Relaxed);
}

/// Whether diagnostic output is currently enabled.
pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Emit a failure diagnostic if the debug toggle is on.
macro_rules! diagnostic {
    ($($arg:tt)*) => {
        if $crate::debug::debug_enabled() {
            ::tracing::warn!($($arg)*);
        }
    };
}

pub(crate) use diagnostic;
