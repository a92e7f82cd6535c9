//! Persistent progress tracking for the two pipeline stages.
//!
//! Each stage keeps a small JSON state file with two watermarks:
//! `last_contiguous_run` (every run up to it is archived) and
//! `last_attempted_run` (highest run ever tried). Successful runs above the
//! contiguous watermark are kept in `pending_runs` so a later batch that
//! fills the gap can bridge across them.
//!
//! Failure logs are flat files with one decimal run number per line.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    #[serde(default)]
    pub last_contiguous_run: u32,
    #[serde(default)]
    pub last_attempted_run: u32,
    /// Successful runs above `last_contiguous_run`, waiting for the gap
    /// below them to close.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_runs: BTreeSet<u32>,
}

/// Read a state file. Missing or malformed files yield the default state;
/// this never fails.
pub fn read_state(state_file: &Path) -> StageState {
    match std::fs::read_to_string(state_file) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to parse state file {}: {e}", state_file.display());
                StageState::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StageState::default(),
        Err(e) => {
            warn!("Failed to read state file {}: {e}", state_file.display());
            StageState::default()
        }
    }
}

/// Serialize the state as JSON, replacing the file atomically (write to a
/// sibling temp file, then rename).
pub fn write_state(state_file: &Path, state: &StageState) -> Result<()> {
    if let Some(parent) = state_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| crate::error::ArchiverError::Io(std::io::Error::other(e)))?;
    let tmp = state_file.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, state_file)?;
    Ok(())
}

/// Advance the contiguous watermark with a batch of successful runs.
///
/// The walk starts at the current watermark and climbs while the next
/// integer is present in the union of the new successes and the persisted
/// pending set; it stops at the first gap. The watermark never decreases.
pub fn advance_contiguous(state_file: &Path, successful_runs: &BTreeSet<u32>) -> Result<()> {
    if successful_runs.is_empty() {
        return Ok(());
    }
    let mut state = read_state(state_file);
    let previous = state.last_contiguous_run;

    let mut union: BTreeSet<u32> = state.pending_runs.clone();
    union.extend(successful_runs.iter().copied());
    union.retain(|&r| r > previous);

    let mut last = previous;
    while union.contains(&(last + 1)) {
        last += 1;
    }

    union.retain(|&r| r > last);
    state.pending_runs = union;

    if last > previous {
        state.last_contiguous_run = last;
        info!(
            "Updated last_contiguous_run in {}: {previous} -> {last}",
            file_name(state_file)
        );
    }
    write_state(state_file, &state)
}

/// Raise the attempted watermark to the highest run in the batch. A no-op
/// on an empty batch; never decreases.
pub fn advance_attempted(state_file: &Path, attempted_runs: &BTreeSet<u32>) -> Result<()> {
    let Some(&max_attempted) = attempted_runs.iter().next_back() else {
        return Ok(());
    };
    let mut state = read_state(state_file);
    if max_attempted > state.last_attempted_run {
        info!(
            "Updated last_attempted_run in {}: {} -> {max_attempted}",
            file_name(state_file),
            state.last_attempted_run
        );
        state.last_attempted_run = max_attempted;
        write_state(state_file, &state)?;
    } else {
        debug!(
            "No update needed for last_attempted_run in {} (current={}, max_attempted={max_attempted})",
            file_name(state_file),
            state.last_attempted_run
        );
    }
    Ok(())
}

/// Lower bound for incremental discovery: work at or below this run number
/// is considered already handled. Zero when no state has been recorded.
pub fn incremental_start(state_file: &Path) -> u32 {
    let state = read_state(state_file);
    let start = state.last_contiguous_run.max(state.last_attempted_run);
    debug!(
        "Incremental start for {}: {start} (contiguous={}, attempted={})",
        file_name(state_file),
        state.last_contiguous_run,
        state.last_attempted_run
    );
    start
}

/// Append run numbers to a failure log, one per line, creating it if
/// missing.
pub fn append_failures(failure_log: &Path, failed_runs: &BTreeSet<u32>) -> Result<()> {
    use std::io::Write;

    if failed_runs.is_empty() {
        return Ok(());
    }
    if let Some(parent) = failure_log.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(failure_log)?;
    for run in failed_runs {
        writeln!(file, "{run}")?;
    }
    Ok(())
}

/// Overwrite a failure log with the given runs in ascending order.
pub fn write_failures(failure_log: &Path, failed_runs: &BTreeSet<u32>) -> Result<()> {
    if let Some(parent) = failure_log.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut contents = String::new();
    for run in failed_runs {
        contents.push_str(&run.to_string());
        contents.push('\n');
    }
    std::fs::write(failure_log, contents)?;
    Ok(())
}

/// Parse a failure log. Blank and non-integer lines are skipped silently;
/// a missing file is an empty log.
pub fn parse_failure_log(failure_log: &Path) -> Vec<u32> {
    let contents = match std::fs::read_to_string(failure_log) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    contents
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("importer_state.json")
    }

    fn runs(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn read_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = read_state(&state_path(&dir));
        assert_eq!(state, StageState::default());
    }

    #[test]
    fn read_malformed_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        std::fs::write(&path, "not json{{").unwrap();
        assert_eq!(read_state(&path), StageState::default());
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.json");
        let state = StageState {
            last_contiguous_run: 7,
            last_attempted_run: 9,
            pending_runs: BTreeSet::new(),
        };
        write_state(&path, &state).unwrap();
        assert_eq!(read_state(&path), state);
    }

    #[test]
    fn contiguous_advance_stops_at_gap() {
        // From {contig=100, attempted=100}, apply {101,102,104}.
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        write_state(
            &path,
            &StageState {
                last_contiguous_run: 100,
                last_attempted_run: 100,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();

        advance_contiguous(&path, &runs(&[101, 102, 104])).unwrap();
        let state = read_state(&path);
        assert_eq!(state.last_contiguous_run, 102);
        assert_eq!(state.pending_runs, runs(&[104]));
    }

    #[test]
    fn contiguous_advance_bridges_pending_run() {
        // Applying {103} afterwards closes the gap and the pre-existing
        // 104 is bridged.
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        write_state(
            &path,
            &StageState {
                last_contiguous_run: 100,
                last_attempted_run: 100,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();

        advance_contiguous(&path, &runs(&[101, 102, 104])).unwrap();
        advance_contiguous(&path, &runs(&[103])).unwrap();

        let state = read_state(&path);
        assert_eq!(state.last_contiguous_run, 104);
        assert!(state.pending_runs.is_empty());
    }

    #[test]
    fn contiguous_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        write_state(
            &path,
            &StageState {
                last_contiguous_run: 50,
                last_attempted_run: 50,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();

        advance_contiguous(&path, &runs(&[10, 11, 12])).unwrap();
        assert_eq!(read_state(&path).last_contiguous_run, 50);
    }

    #[test]
    fn contiguous_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        advance_contiguous(&path, &BTreeSet::new()).unwrap();
        assert!(!path.exists(), "state file must not be created lazily");
    }

    #[test]
    fn attempted_is_monotonic() {
        // From {attempted=105}, advancing with {98,99,100} changes nothing.
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        write_state(
            &path,
            &StageState {
                last_contiguous_run: 0,
                last_attempted_run: 105,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();

        advance_attempted(&path, &runs(&[98, 99, 100])).unwrap();
        assert_eq!(read_state(&path).last_attempted_run, 105);

        advance_attempted(&path, &runs(&[110])).unwrap();
        assert_eq!(read_state(&path).last_attempted_run, 110);
    }

    #[test]
    fn attempted_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        advance_attempted(&path, &BTreeSet::new()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn incremental_start_is_max_of_watermarks() {
        // {contig=102, attempted=110} -> 110.
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        write_state(
            &path,
            &StageState {
                last_contiguous_run: 102,
                last_attempted_run: 110,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();
        assert_eq!(incremental_start(&path), 110);
    }

    #[test]
    fn incremental_start_absent_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(incremental_start(&state_path(&dir)), 0);
    }

    #[test]
    fn failure_log_append_then_parse_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("import_failures.log");

        append_failures(&log, &runs(&[104, 99])).unwrap();
        append_failures(&log, &runs(&[200])).unwrap();

        let parsed: BTreeSet<u32> = parse_failure_log(&log).into_iter().collect();
        assert!(parsed.is_superset(&runs(&[99, 104, 200])));
    }

    #[test]
    fn failure_log_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("failures.log");
        std::fs::write(&log, "101\n\nnot-a-number\n 102 \n-5\n103\n").unwrap();
        assert_eq!(parse_failure_log(&log), vec![101, 102, 103]);
    }

    #[test]
    fn write_failures_overwrites_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("failures.log");
        append_failures(&log, &runs(&[500])).unwrap();
        write_failures(&log, &runs(&[3, 1, 2])).unwrap();
        assert_eq!(parse_failure_log(&log), vec![1, 2, 3]);
    }

    #[test]
    fn parse_missing_failure_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_failure_log(&dir.path().join("none.log")).is_empty());
    }

    #[test]
    fn contiguous_walk_matches_union_invariant() {
        // After applying a sequence of success sets,
        // the watermark equals the largest N with [initial+1..N] fully
        // covered by the union of all applied sets.
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let batches: Vec<Vec<u32>> = vec![
            vec![2, 3, 7],
            vec![5, 6],
            vec![1],
            vec![4],
            vec![10, 11],
            vec![8],
        ];

        let mut union = BTreeSet::new();
        for batch in &batches {
            let set: BTreeSet<u32> = batch.iter().copied().collect();
            union.extend(set.iter().copied());
            advance_contiguous(&path, &set).unwrap();
        }

        let mut expected = 0u32;
        while union.contains(&(expected + 1)) {
            expected += 1;
        }
        assert_eq!(expected, 8);
        assert_eq!(read_state(&path).last_contiguous_run, expected);
    }
}
