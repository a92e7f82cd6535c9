//! Process-wide cooperative shutdown state.
//!
//! Signal handlers and the lock watcher set the flag; stages consult it
//! between indivisible work units. Nothing is ever interrupted mid-task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Global shutdown flag. Signal handlers store to this directly, so it must
/// stay a bare atomic.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

static REASON: Mutex<Option<String>> = Mutex::new(None);

/// Request a graceful shutdown with a human-readable reason.
///
/// Not async-signal-safe; signal handlers store to [`SHUTDOWN`] directly
/// and the dispatcher fills in a default reason afterwards.
pub fn request_shutdown(reason: &str) {
    if let Ok(mut slot) = REASON.lock() {
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn shutdown_reason() -> Option<String> {
    REASON.lock().ok().and_then(|slot| slot.clone())
}

/// Clear the global state. Test-only; the real process exits instead.
pub fn reset() {
    SHUTDOWN.store(false, Ordering::SeqCst);
    if let Ok(mut slot) = REASON.lock() {
        *slot = None;
    }
}

// Tests that mutate the process-global flag must be serialized.
#[cfg(test)]
pub(crate) static TEST_MUTEX: Mutex<()> = Mutex::new(());
