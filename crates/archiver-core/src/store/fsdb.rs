//! In-process filesystem driver for the configuration store.
//!
//! Records live under `<root>/<run_number>/<config_name>/`. The underlying
//! driver contract allows only one call at a time, so every operation takes
//! an internal mutex and [`max_concurrency`](super::ConfigStore::max_concurrency)
//! reports 1 to clamp the stage worker pool.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use super::{log_duration, ConfigStore};
use crate::error::{ArchiverError, Result};

const SCHEMA_FILE: &str = "schema.fcl";

#[derive(Debug)]
pub struct FsdbStore {
    root: PathBuf,
    driver_gate: Mutex<()>,
}

impl FsdbStore {
    /// Parse an `fsdb://` URI (or bare path) into a store rooted there.
    pub fn from_uri(uri: &str) -> Result<FsdbStore> {
        let path = match uri.strip_prefix("fsdb://") {
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(_) => {
                return Err(ArchiverError::Config(format!(
                    "fsdb URI must carry an absolute path: '{uri}'"
                )))
            }
            None if !uri.contains("://") => uri.to_string(),
            None => {
                return Err(ArchiverError::Config(format!(
                    "configuration store URI '{uri}' requires use_cli_tools"
                )))
            }
        };
        Ok(FsdbStore::new(Path::new(&path)))
    }

    pub fn new(root: &Path) -> FsdbStore {
        FsdbStore {
            root: root.to_path_buf(),
            driver_gate: Mutex::new(()),
        }
    }

    fn run_dir(&self, run_number: u32) -> PathBuf {
        self.root.join(run_number.to_string())
    }

    /// The single configuration directory under a run, if any.
    fn config_dir(&self, run_number: u32) -> Result<Option<(String, PathBuf)>> {
        let run_dir = self.run_dir(run_number);
        if !run_dir.is_dir() {
            return Ok(None);
        }
        let mut found = None;
        for entry in std::fs::read_dir(&run_dir)
            .map_err(|e| ArchiverError::ConfigStore(format!("reading {}: {e}", run_dir.display())))?
        {
            let entry =
                entry.map_err(|e| ArchiverError::ConfigStore(format!("reading run dir: {e}")))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                let name = entry.file_name().to_string_lossy().into_owned();
                found = Some((name, entry.path()));
            }
        }
        Ok(found)
    }
}

impl ConfigStore for FsdbStore {
    fn list_runs(&self) -> Result<BTreeSet<u32>> {
        let _gate = self.driver_gate.lock().unwrap();
        let start = Instant::now();
        let mut runs = BTreeSet::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A store nobody has written to yet is empty, not broken.
                log_duration("FsdbStore", "list_runs", start);
                return Ok(runs);
            }
            Err(e) => {
                return Err(ArchiverError::ConfigStore(format!(
                    "listing store root '{}': {e}",
                    self.root.display()
                )))
            }
        };
        for entry in entries {
            let entry =
                entry.map_err(|e| ArchiverError::ConfigStore(format!("listing store: {e}")))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(run) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                runs.insert(run);
            }
        }
        log_duration("FsdbStore", "list_runs", start);
        Ok(runs)
    }

    fn resolve_config_name(&self, run_number: u32) -> Result<String> {
        let _gate = self.driver_gate.lock().unwrap();
        match self.config_dir(run_number)? {
            // The driver reports the fully qualified `<run>/<config>` name.
            Some((name, _)) => Ok(format!("{run_number}/{name}")),
            None => Err(ArchiverError::ConfigStore(format!(
                "no configuration found for run {run_number}"
            ))),
        }
    }

    fn insert(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        let _gate = self.driver_gate.lock().unwrap();
        let start = Instant::now();

        if !source_dir.join(SCHEMA_FILE).is_file() {
            return Err(ArchiverError::ConfigStore(format!(
                "schema file not found: {}",
                source_dir.join(SCHEMA_FILE).display()
            )));
        }
        if self.run_dir(run_number).exists() {
            return Err(ArchiverError::ConfigStore(format!(
                "configuration {run_number}/{config_name} is already archived"
            )));
        }

        let dest = self.run_dir(run_number).join(config_name);
        copy_tree(source_dir, &dest).map_err(|e| {
            ArchiverError::ConfigStore(format!("storing run {run_number}: {e}"))
        })?;
        debug!("Stored configuration {run_number}/{config_name}");
        log_duration("FsdbStore", "insert", start);
        Ok(())
    }

    fn update(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        let _gate = self.driver_gate.lock().unwrap();
        let start = Instant::now();

        let dest = self.run_dir(run_number).join(config_name);
        if !dest.is_dir() {
            return Err(ArchiverError::ConfigStore(format!(
                "configuration {run_number}/{config_name} not found for update"
            )));
        }
        copy_tree(source_dir, &dest).map_err(|e| {
            ArchiverError::ConfigStore(format!("updating run {run_number}: {e}"))
        })?;
        debug!("Updated configuration {run_number}/{config_name}");
        log_duration("FsdbStore", "update", start);
        Ok(())
    }

    fn export(&self, run_number: u32, destination_dir: &Path) -> Result<()> {
        let _gate = self.driver_gate.lock().unwrap();
        let start = Instant::now();

        let Some((_, config_path)) = self.config_dir(run_number)? else {
            return Err(ArchiverError::ConfigStore(format!(
                "no configuration found for run {run_number}"
            )));
        };
        copy_tree(&config_path, destination_dir).map_err(|e| {
            ArchiverError::ConfigStore(format!("exporting run {run_number}: {e}"))
        })?;
        log_duration("FsdbStore", "export", start);
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        1
    }
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
