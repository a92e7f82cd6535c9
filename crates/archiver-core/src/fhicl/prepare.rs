//! Working-directory preparation for the import stage.
//!
//! A run record directory is copied into a scratch directory, recognized
//! text files are replaced by their FHiCL equivalents, derived files are
//! generated from metadata, and the external schema is dropped in.

use std::path::{Path, PathBuf};

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{ArchiverError, Result};

use super::convert::{converter_for, generate_run_history, generate_run_history2};

const METADATA_FILE: &str = "metadata.txt";
const SCHEMA_FILE: &str = "schema.fcl";
const DEFAULT_CONFIG_NAME: &str = "standard";

#[derive(Debug)]
pub struct FclPreparer {
    schema_dir: PathBuf,
    enabled: Vec<String>,
}

impl FclPreparer {
    pub fn new(schema_dir: &Path, enabled: &[String]) -> Result<FclPreparer> {
        if !schema_dir.is_dir() {
            return Err(ArchiverError::FclPreparation(format!(
                "schema directory '{}' is not a directory",
                schema_dir.display()
            )));
        }
        Ok(FclPreparer {
            schema_dir: schema_dir.to_path_buf(),
            enabled: enabled.to_vec(),
        })
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|n| n == name)
    }

    /// Build the initial archive payload for a run. Returns the resolved
    /// configuration name.
    pub fn prepare_for_archive(&self, run_dir: &Path, work_dir: &Path) -> Result<String> {
        copy_dir_recursive(run_dir, work_dir).map_err(|e| {
            ArchiverError::FclPreparation(format!(
                "copying run record '{}': {e}",
                run_dir.display()
            ))
        })?;

        let run_number: Option<u32> = run_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse().ok());

        // Replace recognized top-level text files with FHiCL renditions.
        for entry in std::fs::read_dir(work_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") || !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            if !self.is_enabled(&stem) {
                debug!("Skipping {} (not in fhiclize_generate)", file_name(&path));
                continue;
            }
            let Some(convert) = converter_for(&stem) else {
                warn!("No converter registered for configured kind '{stem}'");
                continue;
            };
            let content = read_text_permissive(&path)?;
            let dest = work_dir.join(format!("{stem}.fcl"));
            std::fs::write(&dest, convert(&content))?;
            std::fs::remove_file(&path)?;
            debug!("Converted {} to {stem}.fcl", file_name(&path));
        }

        if self.is_enabled("RunHistory") {
            let metadata_path = run_dir.join(METADATA_FILE);
            if metadata_path.is_file() {
                let metadata = read_text_permissive(&metadata_path)?;
                let history = generate_run_history(&metadata, run_number);
                std::fs::write(work_dir.join("RunHistory.fcl"), history)?;
                debug!("Generated RunHistory.fcl from {METADATA_FILE}");
            } else {
                warn!(
                    "Cannot generate RunHistory.fcl: {METADATA_FILE} not found in {}",
                    run_dir.display()
                );
            }
        }

        self.copy_schema(work_dir)?;
        Ok(resolve_config_name(run_dir))
    }

    /// Build the stop-time overlay payload. Returns `false` (and writes
    /// nothing) when RunHistory2 is disabled or the run has no stop time
    /// yet.
    pub fn prepare_for_update(&self, run_dir: &Path, work_dir: &Path) -> Result<bool> {
        if !self.is_enabled("RunHistory2") {
            debug!("RunHistory2 not in fhiclize_generate, skipping update");
            return Ok(false);
        }
        let metadata_path = run_dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            return Ok(false);
        }
        let metadata = read_text_permissive(&metadata_path)?;
        let Some(history2) = generate_run_history2(&metadata) else {
            debug!("No stop time recorded for {}, skipping update", run_dir.display());
            return Ok(false);
        };
        std::fs::write(work_dir.join("RunHistory2.fcl"), history2)?;
        self.copy_schema(work_dir)?;
        Ok(true)
    }

    fn copy_schema(&self, work_dir: &Path) -> Result<()> {
        let schema_src = self.schema_dir.join(SCHEMA_FILE);
        if !schema_src.is_file() {
            return Err(ArchiverError::FclPreparation(format!(
                "schema not found at {}",
                schema_src.display()
            )));
        }
        std::fs::copy(&schema_src, work_dir.join(SCHEMA_FILE))?;
        Ok(())
    }
}

/// Extract the configuration name from the run's metadata file. Slashes are
/// flattened to underscores so the name stays a single path segment; a
/// missing or blank name falls back to `"standard"`.
pub fn resolve_config_name(run_dir: &Path) -> String {
    static CONFIG_RE: OnceLock<Regex> = OnceLock::new();
    let config_re = CONFIG_RE.get_or_init(|| Regex::new(r"^Config name:\s+(.*)").unwrap());

    let metadata_path = run_dir.join(METADATA_FILE);
    match std::fs::read_to_string(&metadata_path) {
        Ok(contents) => {
            for line in contents.lines() {
                if let Some(caps) = config_re.captures(line) {
                    let name = caps[1].trim();
                    if !name.is_empty() {
                        return name.replace('/', "_");
                    }
                }
            }
            DEFAULT_CONFIG_NAME.to_string()
        }
        Err(_) => DEFAULT_CONFIG_NAME.to_string(),
    }
}

/// Read a file as UTF-8, replacing invalid sequences. Run records come from
/// many hands; a stray latin-1 byte must not fail the run.
fn read_text_permissive(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
