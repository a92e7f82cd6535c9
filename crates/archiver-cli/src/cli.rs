use std::path::PathBuf;

use clap::{Args, Parser};

#[derive(Parser)]
#[command(
    name = "run-record-archiver",
    version,
    about = "Archive run record configurations: filesystem -> configuration store -> archive store",
    after_help = "\
Execution modes (mutually exclusive):
  [default]                Run full pipeline (import, then migrate)
  --import-only            Run the import stage only
  --migrate-only           Run the migrate stage only
  --retry-failed-import    Retry runs from the import failure log
  --retry-failed-migrate   Retry runs from the migrate failure log
  --report-status          Generate a presence/gap report (no processing)
  --recover-import-state   Rebuild import state from filesystem + configuration store
  --recover-migrate-state  Rebuild migrate state from configuration store + archive store

Exit codes:
  0    Success
  1    Known error (configuration, lock contention, failed runs)
  2    Unexpected error
  130  Interrupted (Ctrl-C)

Signal handling:
  Ctrl-C (once)            Graceful shutdown after in-progress runs complete
  Ctrl-C (3x within 2s)    Immediate shutdown"
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(default_value = "config.yaml")]
    pub config_file: PathBuf,

    /// Enable debug logging, overriding the configured level
    #[arg(short, long)]
    pub verbose: bool,

    /// Skip work at or below the incremental start watermark
    #[arg(long)]
    pub incremental: bool,

    /// With --report-status, cross-check the report against the saved
    /// state files (implies --report-status)
    #[arg(long)]
    pub compare_state: bool,

    /// In migrate, validate blob contents and verify the upload with an
    /// MD5 round trip
    #[arg(long)]
    pub validate: bool,

    #[command(flatten)]
    pub mode: ModeArgs,
}

#[derive(Args)]
#[group(multiple = false)]
pub struct ModeArgs {
    /// Run only the filesystem to configuration store import stage
    #[arg(long)]
    pub import_only: bool,

    /// Run only the configuration store to archive store migrate stage
    #[arg(long)]
    pub migrate_only: bool,

    /// Retry failed runs from the import failure log
    #[arg(long)]
    pub retry_failed_import: bool,

    /// Retry failed runs from the migrate failure log
    #[arg(long)]
    pub retry_failed_migrate: bool,

    /// Report run availability across all data sources
    #[arg(long)]
    pub report_status: bool,

    /// Rebuild the import watermarks and failure log from the stores
    #[arg(long)]
    pub recover_import_state: bool,

    /// Rebuild the migrate watermarks and failure log from the stores
    #[arg(long)]
    pub recover_migrate_state: bool,
}

/// Exactly one execution mode per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    FullPipeline,
    ImportOnly,
    MigrateOnly,
    RetryFailedImport,
    RetryFailedMigrate,
    ReportStatus,
    RecoverImportState,
    RecoverMigrateState,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        let m = &self.mode;
        if m.import_only {
            Mode::ImportOnly
        } else if m.migrate_only {
            Mode::MigrateOnly
        } else if m.retry_failed_import {
            Mode::RetryFailedImport
        } else if m.retry_failed_migrate {
            Mode::RetryFailedMigrate
        } else if m.recover_import_state {
            Mode::RecoverImportState
        } else if m.recover_migrate_state {
            Mode::RecoverMigrateState
        } else if m.report_status || self.compare_state {
            Mode::ReportStatus
        } else {
            Mode::FullPipeline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_mode_is_full_pipeline() {
        let cli = Cli::parse_from(["run-record-archiver"]);
        assert_eq!(cli.mode(), Mode::FullPipeline);
        assert_eq!(cli.config_file, PathBuf::from("config.yaml"));
    }

    #[test]
    fn mode_flags_are_mutually_exclusive() {
        let result =
            Cli::try_parse_from(["run-record-archiver", "--import-only", "--migrate-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn compare_state_implies_report_status() {
        let cli = Cli::parse_from(["run-record-archiver", "--compare-state"]);
        assert_eq!(cli.mode(), Mode::ReportStatus);
    }

    #[test]
    fn incremental_modifies_rather_than_selects() {
        let cli = Cli::parse_from(["run-record-archiver", "--incremental", "--import-only"]);
        assert_eq!(cli.mode(), Mode::ImportOnly);
        assert!(cli.incremental);
    }

    #[test]
    fn all_modes_parse() {
        let cases = [
            (vec!["x", "--import-only"], Mode::ImportOnly),
            (vec!["x", "--migrate-only"], Mode::MigrateOnly),
            (vec!["x", "--retry-failed-import"], Mode::RetryFailedImport),
            (vec!["x", "--retry-failed-migrate"], Mode::RetryFailedMigrate),
            (vec!["x", "--report-status"], Mode::ReportStatus),
            (vec!["x", "--recover-import-state"], Mode::RecoverImportState),
            (vec!["x", "--recover-migrate-state"], Mode::RecoverMigrateState),
        ];
        for (args, expected) in cases {
            assert_eq!(Cli::parse_from(args).mode(), expected);
        }
    }
}
