//! The configuration-store adapter: one capability set, two transports.
//!
//! `fsdb://` URIs select the in-process filesystem driver; any URI combined
//! with `use_cli_tools` selects the subprocess tool transport, optionally
//! tunneled to a remote host over ssh.

pub mod cli;
pub mod fsdb;

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::{Config, FuzzConfig};
use crate::error::{ArchiverError, Result};

/// Narrow contract every backing store must satisfy. Run numbers are the
/// primary key; `(run_number, config_name)` identifies a record.
pub trait ConfigStore: Send + Sync {
    /// Set of run numbers currently archived.
    fn list_runs(&self) -> Result<BTreeSet<u32>>;

    /// Exact configuration name stored for a run. Depending on the
    /// transport this may carry a `<run>/` prefix.
    fn resolve_config_name(&self, run_number: u32) -> Result<String>;

    /// First insertion for `(run, config_name)`; duplicate runs fail.
    fn insert(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()>;

    /// Overlay additional files onto an existing record.
    fn update(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()>;

    /// Write all files comprising the record into `destination_dir`.
    fn export(&self, run_number: u32, destination_dir: &Path) -> Result<()>;

    /// Upper bound on concurrent calls the backing driver tolerates. The
    /// stage engine clamps its worker pool to this.
    fn max_concurrency(&self) -> usize;
}

/// Build the configured store variant.
pub fn from_config(config: &Config) -> Result<Box<dyn ConfigStore>> {
    let store_cfg = &config.configuration_store;
    let inner: Box<dyn ConfigStore> = if store_cfg.use_cli_tools {
        Box::new(cli::ToolStore::new(
            &store_cfg.uri,
            store_cfg.remote_host.as_deref(),
        )?)
    } else {
        Box::new(fsdb::FsdbStore::from_uri(&store_cfg.uri)?)
    };

    if config.fuzz.random_skip_percent > 0 || config.fuzz.random_error_percent > 0 {
        warn!(
            "Fuzz injection active: skip={}%, error={}%",
            config.fuzz.random_skip_percent, config.fuzz.random_error_percent
        );
        return Ok(Box::new(FuzzStore {
            inner,
            fuzz: config.fuzz.clone(),
        }));
    }
    Ok(inner)
}

pub(crate) fn log_duration(client: &str, op: &str, start: Instant) {
    debug!(
        "PERF: {client}.{op} executed in {:.2} ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

/// Failure-injection decorator used by soak tests. Rolls happen on the
/// insert path only, before the real store is touched.
struct FuzzStore {
    inner: Box<dyn ConfigStore>,
    fuzz: FuzzConfig,
}

impl FuzzStore {
    fn roll(&self, run_number: u32) -> Result<()> {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        if self.fuzz.random_skip_percent > 0
            && rng.gen_range(1..=100) <= self.fuzz.random_skip_percent as u32
        {
            if self.fuzz.random_skip_retry {
                warn!("[FUZZ] Permanently skipping run {run_number} - will NOT retry");
                return Err(ArchiverError::PermanentSkip {
                    run: run_number,
                    reason: "fuzz skip (random_skip_retry=true)".into(),
                });
            }
            warn!(
                "[FUZZ] Randomly failing run {run_number} - will retry later (skip={}%)",
                self.fuzz.random_skip_percent
            );
            return Err(ArchiverError::ConfigStore(format!(
                "[FUZZ] random skip for run {run_number}"
            )));
        }

        if self.fuzz.random_error_percent > 0
            && rng.gen_range(1..=100) <= self.fuzz.random_error_percent as u32
        {
            if self.fuzz.random_error_retry {
                warn!("[FUZZ] Permanently failing run {run_number} - will NOT retry");
                return Err(ArchiverError::PermanentSkip {
                    run: run_number,
                    reason: "fuzz error (random_error_retry=true)".into(),
                });
            }
            warn!(
                "[FUZZ] Randomly failing run {run_number} - will retry later (error={}%)",
                self.fuzz.random_error_percent
            );
            return Err(ArchiverError::ConfigStore(format!(
                "[FUZZ] random failure for run {run_number}"
            )));
        }

        Ok(())
    }
}

impl ConfigStore for FuzzStore {
    fn list_runs(&self) -> Result<BTreeSet<u32>> {
        self.inner.list_runs()
    }

    fn resolve_config_name(&self, run_number: u32) -> Result<String> {
        self.inner.resolve_config_name(run_number)
    }

    fn insert(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        self.roll(run_number)?;
        self.inner.insert(run_number, config_name, source_dir)
    }

    fn update(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        self.inner.update(run_number, config_name, source_dir)
    }

    fn export(&self, run_number: u32, destination_dir: &Path) -> Result<()> {
        self.inner.export(run_number, destination_dir)
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }
}

/// Scan a run-records directory for subdirectories named as run numbers.
pub fn scan_source_runs(run_records_dir: &Path) -> Result<BTreeSet<u32>> {
    let entries = std::fs::read_dir(run_records_dir).map_err(|e| {
        ArchiverError::ConfigStore(format!(
            "cannot read run records directory '{}': {e}",
            run_records_dir.display()
        ))
    })?;
    let mut runs = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            ArchiverError::ConfigStore(format!("cannot read run records directory entry: {e}"))
        })?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if let Some(run) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
            if run > 0 {
                runs.insert(run);
            }
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FuzzConfig;

    struct NullStore;

    impl ConfigStore for NullStore {
        fn list_runs(&self) -> Result<BTreeSet<u32>> {
            Ok(BTreeSet::new())
        }
        fn resolve_config_name(&self, _run: u32) -> Result<String> {
            Ok("standard".into())
        }
        fn insert(&self, _run: u32, _name: &str, _dir: &Path) -> Result<()> {
            Ok(())
        }
        fn update(&self, _run: u32, _name: &str, _dir: &Path) -> Result<()> {
            Ok(())
        }
        fn export(&self, _run: u32, _dir: &Path) -> Result<()> {
            Ok(())
        }
        fn max_concurrency(&self) -> usize {
            usize::MAX
        }
    }

    #[test]
    fn scan_skips_non_numeric_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["100", "101", "notarun", "0", "102"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("103"), "a file, not a dir").unwrap();

        let runs = scan_source_runs(dir.path()).unwrap();
        assert_eq!(runs, [100, 101, 102].into_iter().collect());
    }

    #[test]
    fn scan_missing_directory_is_error() {
        let err = scan_source_runs(Path::new("/nonexistent/run_records")).unwrap_err();
        assert!(matches!(err, ArchiverError::ConfigStore(_)));
    }

    #[test]
    fn fuzz_always_skip_is_permanent() {
        let store = FuzzStore {
            inner: Box::new(NullStore),
            fuzz: FuzzConfig {
                random_skip_percent: 100,
                random_error_percent: 0,
                random_skip_retry: true,
                random_error_retry: false,
            },
        };
        let dir = tempfile::tempdir().unwrap();
        let err = store.insert(7, "standard", dir.path()).unwrap_err();
        assert!(matches!(err, ArchiverError::PermanentSkip { run: 7, .. }));
        // Non-insert operations are never fuzzed.
        assert!(store.update(7, "standard", dir.path()).is_ok());
        assert!(store.export(7, dir.path()).is_ok());
    }

    #[test]
    fn fuzz_always_error_is_retryable() {
        let store = FuzzStore {
            inner: Box::new(NullStore),
            fuzz: FuzzConfig {
                random_skip_percent: 0,
                random_error_percent: 100,
                random_skip_retry: false,
                random_error_retry: false,
            },
        };
        let dir = tempfile::tempdir().unwrap();
        let err = store.insert(7, "standard", dir.path()).unwrap_err();
        assert!(err.is_retryable());
    }
}
