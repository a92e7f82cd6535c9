//! Mode dispatch: build the adapters a mode needs and run it.

use tracing::info;

use archiver_core::archive::ArchiveClient;
use archiver_core::config::Config;
use archiver_core::error::Result;
use archiver_core::metrics::MetricsClient;
use archiver_core::recover;
use archiver_core::report;
use archiver_core::stage::import::ImportStage;
use archiver_core::stage::migrate::MigrateStage;
use archiver_core::stage::StageEngine;
use archiver_core::store;

use crate::cli::{Cli, Mode};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;

/// Run the selected mode. Adapters are constructed only for the modes that
/// need them, so an import-only invocation does not require the archive
/// store to be reachable.
pub fn run_mode(config: &Config, cli: &Cli) -> Result<i32> {
    let store = store::from_config(config)?;
    let metrics = MetricsClient::from_config(&config.reporting.metrics);

    match cli.mode() {
        Mode::RecoverImportState => {
            recover::recover_import_state(config, store.as_ref())?;
            Ok(EXIT_SUCCESS)
        }
        Mode::RecoverMigrateState => {
            let archive = ArchiveClient::new(&config.archive_store)?;
            recover::recover_migrate_state(config, store.as_ref(), &archive)?;
            Ok(EXIT_SUCCESS)
        }
        Mode::ReportStatus => {
            let archive = ArchiveClient::new(&config.archive_store)?;
            report::generate_report(config, store.as_ref(), &archive, cli.compare_state)?;
            Ok(EXIT_SUCCESS)
        }
        Mode::RetryFailedImport => {
            let stage = ImportStage::new(config, store.as_ref())?;
            let engine = StageEngine::new(&stage, &config.app, &config.reporting);
            exit_code(engine.run_failure_recovery()?)
        }
        Mode::RetryFailedMigrate => {
            let archive = ArchiveClient::new(&config.archive_store)?;
            let stage =
                MigrateStage::new(config, store.as_ref(), &archive, cli.validate, metrics);
            let engine = StageEngine::new(&stage, &config.app, &config.reporting);
            exit_code(engine.run_failure_recovery()?)
        }
        Mode::ImportOnly => {
            info!("Starting import stage");
            let stage = ImportStage::new(config, store.as_ref())?;
            let engine = StageEngine::new(&stage, &config.app, &config.reporting);
            exit_code(engine.run(cli.incremental)?)
        }
        Mode::MigrateOnly => {
            info!("Starting migrate stage");
            let archive = ArchiveClient::new(&config.archive_store)?;
            let stage =
                MigrateStage::new(config, store.as_ref(), &archive, cli.validate, metrics);
            let engine = StageEngine::new(&stage, &config.app, &config.reporting);
            exit_code(engine.run(cli.incremental)?)
        }
        Mode::FullPipeline => {
            info!("Starting import stage");
            let import_stage = ImportStage::new(config, store.as_ref())?;
            let import_engine = StageEngine::new(&import_stage, &config.app, &config.reporting);
            let import_ok = import_engine.run(cli.incremental)?;
            info!(
                "Import stage finished ({})",
                if import_ok { "clean" } else { "with failures" }
            );

            if archiver_core::shutdown::shutdown_requested() {
                return exit_code(false);
            }

            info!("Starting migrate stage");
            let archive = ArchiveClient::new(&config.archive_store)?;
            let migrate_stage =
                MigrateStage::new(config, store.as_ref(), &archive, cli.validate, metrics);
            let migrate_engine = StageEngine::new(&migrate_stage, &config.app, &config.reporting);
            let migrate_ok = migrate_engine.run(cli.incremental)?;
            info!(
                "Migrate stage finished ({})",
                if migrate_ok { "clean" } else { "with failures" }
            );

            exit_code(import_ok && migrate_ok)
        }
    }
}

fn exit_code(clean: bool) -> Result<i32> {
    Ok(if clean { EXIT_SUCCESS } else { EXIT_ERROR })
}
