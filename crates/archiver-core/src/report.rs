//! Status reporting: presence, ranges and gaps across the three data
//! sources, the ordered differentials between them, and an optional
//! cross-check of the persisted watermarks.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::error::Result;
use crate::state;
use crate::store::{scan_source_runs, ConfigStore};

const RULE: &str = "======================================================================";
const SUBRULE: &str = "----------------------------------------------------------------------";

/// Compute the contiguous ranges and the gap set of a run set.
pub fn ranges_and_gaps(runs: &BTreeSet<u32>) -> (Vec<(u32, u32)>, Vec<u32>) {
    let Some((&min_run, &max_run)) = runs.iter().next().zip(runs.iter().next_back()) else {
        return (Vec::new(), Vec::new());
    };
    let gaps: Vec<u32> = (min_run..=max_run).filter(|r| !runs.contains(r)).collect();

    let mut ranges = Vec::new();
    let mut start = min_run;
    let mut prev = min_run;
    for &run in runs.iter().skip(1) {
        if run != prev + 1 {
            ranges.push((start, prev));
            start = run;
        }
        prev = run;
    }
    ranges.push((start, prev));
    (ranges, gaps)
}

fn format_ranges(ranges: &[(u32, u32)], max_display: usize) -> String {
    if ranges.is_empty() {
        return "None".to_string();
    }
    let fmt = |&(start, end): &(u32, u32)| {
        if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        }
    };
    if ranges.len() <= max_display {
        ranges.iter().map(fmt).collect::<Vec<_>>().join(", ")
    } else {
        let half = max_display / 2;
        let first: Vec<String> = ranges[..half].iter().map(fmt).collect();
        let last: Vec<String> = ranges[ranges.len() - half..].iter().map(fmt).collect();
        format!(
            "{} ... {} ({} ranges total)",
            first.join(", "),
            last.join(", "),
            ranges.len()
        )
    }
}

fn format_gaps(gaps: &[u32], max_display: usize) -> String {
    if gaps.is_empty() {
        return "None".to_string();
    }
    if gaps.len() <= max_display {
        gaps.iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        let displayed: Vec<String> = gaps[..max_display].iter().map(|g| g.to_string()).collect();
        format!("{} ... ({} gaps total)", displayed.join(", "), gaps.len())
    }
}

fn recommendations(
    fs_runs: &BTreeSet<u32>,
    store_runs: &BTreeSet<u32>,
    archive_runs: &BTreeSet<u32>,
) -> Vec<String> {
    let mut recs = Vec::new();

    let to_import: BTreeSet<u32> = fs_runs.difference(store_runs).copied().collect();
    if let Some((&min, &max)) = to_import.iter().next().zip(to_import.iter().next_back()) {
        recs.push(format!(
            "Run IMPORTER: {} run(s) on filesystem not in configuration store (range: {min}-{max})",
            to_import.len()
        ));
    }

    let to_migrate: BTreeSet<u32> = store_runs.difference(archive_runs).copied().collect();
    if let Some((&min, &max)) = to_migrate.iter().next().zip(to_migrate.iter().next_back()) {
        recs.push(format!(
            "Run MIGRATOR: {} run(s) in configuration store not in archive store (range: {min}-{max})",
            to_migrate.len()
        ));
    }

    let orphaned = store_runs.difference(fs_runs).count();
    if orphaned > 0 {
        recs.push(format!(
            "WARNING: {orphaned} run(s) in configuration store but not on filesystem (may have been deleted)"
        ));
    }

    let archive_only = archive_runs.difference(store_runs).count();
    if archive_only > 0 {
        recs.push(format!(
            "INFO: {archive_only} run(s) in archive store but not in configuration store (may have been cleaned up from intermediate storage)"
        ));
    }

    if recs.is_empty() {
        recs.push("All systems are synchronized - no action needed".to_string());
    }
    recs
}

fn report_source(title: &str, location: &str, runs: &BTreeSet<u32>) {
    let (ranges, gaps) = ranges_and_gaps(runs);
    info!("");
    info!("{title}");
    info!("{SUBRULE}");
    info!("  Location:        {location}");
    info!("  Total Runs:      {}", runs.len());
    match runs.iter().next().zip(runs.iter().next_back()) {
        Some((min, max)) => {
            info!("  Range:           {min} to {max}");
            info!("  Contiguous:      {}", format_ranges(&ranges, 10));
            info!("  Gaps:            {}", format_gaps(&gaps, 20));
        }
        None => info!("  Status:          No runs found"),
    }
}

fn compare_stage_state(
    title: &str,
    dest_label: &str,
    last_contiguous: u32,
    source_runs: &BTreeSet<u32>,
    dest_runs: &BTreeSet<u32>,
    failures: &BTreeSet<u32>,
) {
    info!("");
    info!("{title}");
    info!("{SUBRULE}");
    info!("  Last Contiguous Run: {last_contiguous}");
    if last_contiguous > 0 {
        let missing: Vec<u32> = source_runs
            .iter()
            .copied()
            .filter(|&r| r <= last_contiguous && !dest_runs.contains(&r))
            .collect();
        if missing.is_empty() {
            info!("  Status:              All expected runs present in {dest_label}");
        } else {
            warn!(
                "  Missing in {dest_label}: {} run(s) before last contiguous ({})",
                missing.len(),
                format_gaps(&missing, 10)
            );
        }
        let new_runs: BTreeSet<u32> = source_runs
            .iter()
            .copied()
            .filter(|&r| r > last_contiguous)
            .collect();
        if let Some((&min, &max)) = new_runs.iter().next().zip(new_runs.iter().next_back()) {
            info!(
                "  New Runs Available:  {} run(s) since last state update (range: {min}-{max})",
                new_runs.len()
            );
        }
    } else {
        info!("  Status:              No state recorded");
    }
    if !failures.is_empty() {
        let listed: Vec<u32> = failures.iter().copied().collect();
        warn!(
            "  Failed Runs:         {} run(s) logged as failed ({})",
            failures.len(),
            format_gaps(&listed, 10)
        );
    }
}

/// Generate the full status report. With `compare_state` the persisted
/// watermarks and failure logs are checked against the live presence sets.
pub fn generate_report(
    config: &Config,
    store: &dyn ConfigStore,
    archive: &dyn ArchiveStore,
    compare_state: bool,
) -> Result<()> {
    info!("{RULE}");
    info!("RUN RECORD ARCHIVER - STATUS REPORT");
    info!("{RULE}");
    info!("Querying data sources...");

    let fs_runs = scan_source_runs(&config.source_files.run_records_dir)?;
    info!("Filesystem query complete");
    let store_runs = store.list_runs()?;
    info!("Configuration store query complete");
    let archive_runs = archive.list_runs()?;
    info!("Archive store query complete");

    info!("");
    info!("{RULE}");
    info!("DATA SOURCE SUMMARY");
    info!("{RULE}");
    report_source(
        "FILESYSTEM (Source)",
        &config.source_files.run_records_dir.display().to_string(),
        &fs_runs,
    );
    report_source(
        "CONFIGURATION STORE (Intermediate)",
        &config.configuration_store.uri,
        &store_runs,
    );
    report_source(
        "ARCHIVE STORE (Long-term)",
        &format!(
            "{} ({}/{})",
            config.archive_store.url,
            config.archive_store.folder_name,
            config.archive_store.object_name
        ),
        &archive_runs,
    );

    if compare_state {
        let import_state = state::read_state(&config.app.import_state_file());
        let migrate_state = state::read_state(&config.app.migrate_state_file());
        let import_failures: BTreeSet<u32> =
            state::parse_failure_log(&config.app.import_failure_log())
                .into_iter()
                .collect();
        let migrate_failures: BTreeSet<u32> =
            state::parse_failure_log(&config.app.migrate_failure_log())
                .into_iter()
                .collect();

        info!("");
        info!("{RULE}");
        info!("STATE COMPARISON");
        info!("{RULE}");
        compare_stage_state(
            "IMPORT STAGE STATE",
            "configuration store",
            import_state.last_contiguous_run,
            &fs_runs,
            &store_runs,
            &import_failures,
        );
        compare_stage_state(
            "MIGRATION STAGE STATE",
            "archive store",
            migrate_state.last_contiguous_run,
            &store_runs,
            &archive_runs,
            &migrate_failures,
        );
    }

    info!("");
    info!("{RULE}");
    info!("RECOMMENDATIONS");
    info!("{RULE}");
    for (i, rec) in recommendations(&fs_runs, &store_runs, &archive_runs)
        .iter()
        .enumerate()
    {
        info!("{}. {rec}", i + 1);
    }
    info!("");
    info!("{RULE}");
    info!("END OF STATUS REPORT");
    info!("{RULE}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runs(values: impl IntoIterator<Item = u32>) -> BTreeSet<u32> {
        values.into_iter().collect()
    }

    #[test]
    fn ranges_and_gaps_of_empty_set() {
        let (ranges, gaps) = ranges_and_gaps(&BTreeSet::new());
        assert!(ranges.is_empty());
        assert!(gaps.is_empty());
    }

    #[test]
    fn ranges_and_gaps_split_at_holes() {
        let (ranges, gaps) = ranges_and_gaps(&runs([1, 2, 3, 5, 6, 9]));
        assert_eq!(ranges, vec![(1, 3), (5, 6), (9, 9)]);
        assert_eq!(gaps, vec![4, 7, 8]);
    }

    #[test]
    fn contiguous_set_has_no_gaps() {
        let (ranges, gaps) = ranges_and_gaps(&runs(10..=20));
        assert_eq!(ranges, vec![(10, 20)]);
        assert!(gaps.is_empty());
    }

    #[test]
    fn range_formatting_truncates() {
        let many: Vec<(u32, u32)> = (0..30).map(|i| (i * 10, i * 10 + 1)).collect();
        let text = format_ranges(&many, 10);
        assert!(text.contains("..."), "{text}");
        assert!(text.contains("30 ranges total"), "{text}");
        assert_eq!(format_ranges(&[(5, 5)], 10), "5");
        assert_eq!(format_ranges(&[(1, 4)], 10), "1-4");
        assert_eq!(format_ranges(&[], 10), "None");
    }

    #[test]
    fn gap_formatting_truncates() {
        let many: Vec<u32> = (0..50).collect();
        let text = format_gaps(&many, 20);
        assert!(text.contains("(50 gaps total)"), "{text}");
        assert_eq!(format_gaps(&[], 20), "None");
    }

    #[test]
    fn recommendations_cover_all_differentials() {
        let fs = runs([1, 2, 3, 4]);
        let store = runs([1, 2, 5]);
        let archive = runs([1, 9]);
        let recs = recommendations(&fs, &store, &archive);
        assert_eq!(recs.len(), 4, "{recs:?}");
        assert!(recs[0].contains("Run IMPORTER: 2 run(s)"), "{recs:?}");
        assert!(recs[1].contains("Run MIGRATOR: 2 run(s)"), "{recs:?}");
        assert!(recs[2].contains("WARNING: 1 run(s)"), "{recs:?}");
        assert!(recs[3].contains("INFO: 1 run(s)"), "{recs:?}");
    }

    #[test]
    fn synchronized_sources_recommend_nothing() {
        let all = runs([1, 2, 3]);
        let recs = recommendations(&all, &all, &all);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("synchronized"), "{recs:?}");
    }
}
