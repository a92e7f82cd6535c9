//! Rebuild stage state from the authoritative data sources.
//!
//! Recovery treats the destination store as ground truth: the contiguous
//! watermark is the consecutive prefix actually present, the attempted
//! watermark is the highest run present, and only gaps below that
//! watermark become failures. Runs above it were simply never attempted.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::error::Result;
use crate::state::{self, StageState};
use crate::store::{scan_source_runs, ConfigStore};

#[derive(Debug, PartialEq, Eq)]
pub struct RecoverySummary {
    pub last_contiguous_run: u32,
    pub last_attempted_run: u32,
    pub failures: BTreeSet<u32>,
}

/// Rebuild one stage's watermarks and failure log from the presence sets
/// of its source and destination.
pub fn recover_stage_state(
    state_file: &Path,
    failure_log: &Path,
    source_runs: &BTreeSet<u32>,
    dest_runs: &BTreeSet<u32>,
) -> Result<RecoverySummary> {
    let last_attempted_run = dest_runs.iter().next_back().copied().unwrap_or(0);

    let last_contiguous_run = match dest_runs.iter().next() {
        Some(&min_run) => {
            let mut last = min_run;
            while dest_runs.contains(&(last + 1)) {
                last += 1;
            }
            last
        }
        None => 0,
    };

    let failures: BTreeSet<u32> = source_runs
        .difference(dest_runs)
        .copied()
        .filter(|&r| r <= last_attempted_run)
        .collect();

    // Successes stranded above the watermark are kept as pending so later
    // batches can bridge across them.
    let pending_runs: BTreeSet<u32> = dest_runs
        .iter()
        .copied()
        .filter(|&r| r > last_contiguous_run)
        .collect();

    state::write_state(
        state_file,
        &StageState {
            last_contiguous_run,
            last_attempted_run,
            pending_runs,
        },
    )?;
    state::write_failures(failure_log, &failures)?;

    Ok(RecoverySummary {
        last_contiguous_run,
        last_attempted_run,
        failures,
    })
}

/// Rebuild the import stage state from the filesystem and the
/// configuration store.
pub fn recover_import_state(
    config: &Config,
    store: &dyn ConfigStore,
) -> Result<RecoverySummary> {
    info!("Recovering import state from filesystem and configuration store");
    let fs_runs = scan_source_runs(&config.source_files.run_records_dir)?;
    let store_runs = store.list_runs()?;
    let summary = recover_stage_state(
        &config.app.import_state_file(),
        &config.app.import_failure_log(),
        &fs_runs,
        &store_runs,
    )?;
    info!(
        "Import state recovered: contiguous={}, attempted={}, {} failures",
        summary.last_contiguous_run,
        summary.last_attempted_run,
        summary.failures.len()
    );
    Ok(summary)
}

/// Rebuild the migrate stage state from the configuration store and the
/// archive store.
pub fn recover_migrate_state(
    config: &Config,
    store: &dyn ConfigStore,
    archive: &dyn ArchiveStore,
) -> Result<RecoverySummary> {
    info!("Recovering migration state from configuration store and archive store");
    let store_runs = store.list_runs()?;
    let archive_runs = archive.list_runs()?;
    let summary = recover_stage_state(
        &config.app.migrate_state_file(),
        &config.app.migrate_failure_log(),
        &store_runs,
        &archive_runs,
    )?;
    info!(
        "Migration state recovered: contiguous={}, attempted={}, {} failures",
        summary.last_contiguous_run,
        summary.last_attempted_run,
        summary.failures.len()
    );
    Ok(summary)
}
