//! File log writer with combined size and age rotation.
//!
//! Rotation renames `archiver.log` to `archiver.log.1` (shifting existing
//! backups up, dropping the oldest) whenever the file would exceed the
//! size cap or has been open longer than the age cap.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::MakeWriter;

pub const LOG_FILE_MAX_BYTES: u64 = 500 * 1024 * 1024;
pub const LOG_FILE_MAX_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);
pub const LOG_FILE_BACKUP_COUNT: usize = 5;

pub struct RollingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    max_age: Duration,
    backup_count: usize,
    file: File,
    written: u64,
    opened_at: SystemTime,
}

impl RollingFileWriter {
    pub fn new(path: &Path) -> io::Result<RollingFileWriter> {
        Self::with_limits(path, LOG_FILE_MAX_BYTES, LOG_FILE_MAX_AGE, LOG_FILE_BACKUP_COUNT)
    }

    pub fn with_limits(
        path: &Path,
        max_bytes: u64,
        max_age: Duration,
        backup_count: usize,
    ) -> io::Result<RollingFileWriter> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let metadata = file.metadata()?;
        let opened_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or_else(|_| SystemTime::now());
        Ok(RollingFileWriter {
            path: path.to_path_buf(),
            max_bytes,
            max_age,
            backup_count,
            written: metadata.len(),
            file,
            opened_at,
        })
    }

    fn should_rollover(&self, incoming: usize) -> bool {
        if self.written + incoming as u64 > self.max_bytes {
            return true;
        }
        self.opened_at
            .elapsed()
            .map(|age| age >= self.max_age)
            .unwrap_or(false)
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backup_count > 0 {
            for i in (1..self.backup_count).rev() {
                let from = backup_path(&self.path, i);
                if from.exists() {
                    std::fs::rename(&from, backup_path(&self.path, i + 1))?;
                }
            }
            if self.path.exists() {
                std::fs::rename(&self.path, backup_path(&self.path, 1))?;
            }
        }
        self.file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        self.opened_at = SystemTime::now();
        Ok(())
    }
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rollover(buf.len()) {
            self.rollover()?;
        }
        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `MakeWriter` adapter handing out locked handles to a shared writer.
#[derive(Clone)]
pub struct RollingMakeWriter(Arc<Mutex<RollingFileWriter>>);

impl RollingMakeWriter {
    pub fn new(writer: RollingFileWriter) -> RollingMakeWriter {
        RollingMakeWriter(Arc::new(Mutex::new(writer)))
    }
}

pub struct RollingWriterHandle(Arc<Mutex<RollingFileWriter>>);

impl Write for RollingWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for RollingMakeWriter {
    type Writer = RollingWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriterHandle(Arc::clone(&self.0))
    }
}
