//! Single-instance enforcement via an advisory `flock` on a lock file.
//!
//! The holder writes its pid into the file; a watcher thread polls the file
//! and requests a graceful shutdown if it disappears or the pid no longer
//! matches (another process clobbered it, or the work directory was wiped).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ArchiverError, Result};
use crate::shutdown;

const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);
const WATCH_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// An exclusively held lock file. Released (unlocked) on drop.
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Acquire the lock without blocking. On contention the error carries
    /// the pid read from the lock file for diagnostics.
    pub fn acquire(path: &Path) -> Result<FileLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error();
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim().to_string();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(ArchiverError::LockHeld {
                    path: path.display().to_string(),
                    holder: if holder.is_empty() {
                        "unknown".to_string()
                    } else {
                        holder
                    },
                });
            }
            return Err(errno.into());
        }

        // We own the lock; record our pid for the watcher and for operators.
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!("Acquired lock file {} (pid {})", path.display(), std::process::id());

        Ok(FileLock {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!("Released lock file {}", self.path.display());
    }
}

/// Background liveness check for the held lock file.
pub struct LockWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl LockWatcher {
    /// Start watching `path`. If the file vanishes or its content stops
    /// matching our pid, a graceful shutdown is requested and the watcher
    /// exits.
    pub fn start(path: &Path) -> LockWatcher {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let watched = path.to_path_buf();
        let own_pid = std::process::id().to_string();

        let handle = std::thread::Builder::new()
            .name("lock-watcher".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    match std::fs::read_to_string(&watched) {
                        Ok(contents) if contents.trim() == own_pid => {}
                        Ok(contents) => {
                            warn!(
                                "Lock file {} now owned by pid '{}' (expected {own_pid}); requesting shutdown",
                                watched.display(),
                                contents.trim()
                            );
                            shutdown::request_shutdown("Lock file ownership changed");
                            break;
                        }
                        Err(e) => {
                            warn!(
                                "Lock file {} unreadable ({e}); requesting shutdown",
                                watched.display()
                            );
                            shutdown::request_shutdown("Lock file removed");
                            break;
                        }
                    }
                    std::thread::sleep(WATCH_POLL_INTERVAL);
                }
            })
            .expect("spawning lock watcher thread");

        LockWatcher {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the watcher to exit and wait for it, bounded by a 2 s cap.
    /// A watcher that does not exit in time is abandoned.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + WATCH_JOIN_TIMEOUT;
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    warn!("Lock watcher did not stop within {WATCH_JOIN_TIMEOUT:?}; abandoning");
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            let _ = handle.join();
        }
    }
}

impl Drop for LockWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
