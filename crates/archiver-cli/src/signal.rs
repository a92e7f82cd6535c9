//! Interrupt handling for cooperative shutdown.
//!
//! The first SIGINT (or a SIGTERM) requests a graceful shutdown via the
//! shared flag. Three SIGINTs inside a two-second window exit immediately
//! with code 130 without waiting for in-progress work.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use archiver_core::shutdown::SHUTDOWN;

const SIGINT_IMMEDIATE_SHUTDOWN_COUNT: u32 = 3;
const SIGINT_TIME_WINDOW_SECONDS: i64 = 2;
const EXIT_CODE_INTERRUPTED: i32 = 130;

static SIGINT_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_SIGINT_TIME: AtomicI64 = AtomicI64::new(0);

pub fn install_signal_handlers() {
    // Safety: the handlers only touch atomics and async-signal-safe libc
    // calls (`time`, `_exit`).
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_sigint as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_sigterm as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    let now = unsafe { libc::time(std::ptr::null_mut()) } as i64;
    let last = LAST_SIGINT_TIME.swap(now, Ordering::SeqCst);

    let count = if now - last > SIGINT_TIME_WINDOW_SECONDS {
        SIGINT_COUNT.store(1, Ordering::SeqCst);
        1
    } else {
        SIGINT_COUNT.fetch_add(1, Ordering::SeqCst) + 1
    };

    if count >= SIGINT_IMMEDIATE_SHUTDOWN_COUNT {
        unsafe { libc::_exit(EXIT_CODE_INTERRUPTED) }
    }
    SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigterm(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
