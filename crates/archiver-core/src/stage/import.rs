//! Import stage: source filesystem into the configuration store.
//!
//! Each run is a two-phase operation: the prepared record is inserted
//! first, then a stop-time overlay is applied when the run has finished
//! and RunHistory2 generation is enabled.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::info;

use crate::config::Config;
use crate::error::{ArchiverError, Result};
use crate::fhicl::FclPreparer;
use crate::state;
use crate::store::{scan_source_runs, ConfigStore};

use super::Stage;

pub struct ImportStage<'a> {
    config: &'a Config,
    store: &'a dyn ConfigStore,
    preparer: FclPreparer,
}

impl<'a> ImportStage<'a> {
    pub fn new(config: &'a Config, store: &'a dyn ConfigStore) -> Result<ImportStage<'a>> {
        let preparer = FclPreparer::new(
            &config.configuration_store.schema_dir,
            &config.fhiclize_generate,
        )?;
        Ok(ImportStage {
            config,
            store,
            preparer,
        })
    }
}

impl Stage for ImportStage<'_> {
    fn name(&self) -> &'static str {
        "Import"
    }

    fn state_file(&self) -> PathBuf {
        self.config.app.import_state_file()
    }

    fn failure_log(&self) -> PathBuf {
        self.config.app.import_failure_log()
    }

    fn discover(&self, incremental: bool) -> Result<Vec<u32>> {
        info!(
            "Import stage: fetching runs (mode: {})",
            if incremental { "incremental" } else { "full" }
        );
        let fs_runs = scan_source_runs(&self.config.source_files.run_records_dir)?;
        let archived = self.store.list_runs()?;
        let mut candidates: BTreeSet<u32> = fs_runs.difference(&archived).copied().collect();

        if incremental {
            let start = state::incremental_start(&self.state_file());
            candidates.retain(|&r| r > start);
        }

        info!("Import stage: found {} runs to import", candidates.len());
        Ok(candidates.into_iter().collect())
    }

    fn process_one(&self, run_number: u32) -> Result<()> {
        let run_dir = self
            .config
            .source_files
            .run_records_dir
            .join(run_number.to_string());
        if !run_dir.is_dir() {
            return Err(ArchiverError::FclPreparation(format!(
                "run directory not found: {}",
                run_dir.display()
            )));
        }

        // Phase 1: prepared record + insert. The scratch directory is
        // removed on every exit path when the guard drops.
        let initial_dir = tempfile::Builder::new()
            .prefix(&format!("importer_{run_number}_"))
            .tempdir()?;
        let config_name = self
            .preparer
            .prepare_for_archive(&run_dir, initial_dir.path())?;
        self.store
            .insert(run_number, &config_name, initial_dir.path())?;
        drop(initial_dir);

        // Phase 2: stop-time overlay, when there is one to apply.
        let update_dir = tempfile::Builder::new()
            .prefix(&format!("importer_{run_number}_upd_"))
            .tempdir()?;
        if self
            .preparer
            .prepare_for_update(&run_dir, update_dir.path())?
        {
            self.store
                .update(run_number, &config_name, update_dir.path())?;
        }
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        self.store.max_concurrency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StageState;
    use crate::store::fsdb::FsdbStore;
    use std::path::Path;

    fn test_config(tmp: &Path) -> Config {
        let yaml = format!(
            r#"
app:
  work_dir: {work}
source_files:
  run_records_dir: {records}
configuration_store:
  uri: fsdb://{db}
  schema_dir: {schema}
archive_store:
  url: https://ucon.example.org/ucondb
  folder_name: run_records
  object_name: configuration
  writer_user: archiver
  writer_password: pw
fhiclize_generate:
  - metadata
  - RunHistory
  - RunHistory2
"#,
            work = tmp.join("work").display(),
            records = tmp.join("run_records").display(),
            db = tmp.join("confdb").display(),
            schema = tmp.join("fcl").display(),
        );
        let config_path = tmp.join("config.yaml");
        std::fs::create_dir_all(tmp.join("run_records")).unwrap();
        std::fs::create_dir_all(tmp.join("fcl")).unwrap();
        std::fs::write(tmp.join("fcl/schema.fcl"), "layout: {}\n").unwrap();
        std::fs::write(&config_path, yaml).unwrap();
        Config::from_file(&config_path).unwrap()
    }

    fn add_run(tmp: &Path, run: u32, metadata: &str) {
        let dir = tmp.join("run_records").join(run.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.txt"), metadata).unwrap();
    }

    #[test]
    fn discover_subtracts_store_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();

        for run in [100u32, 101, 102] {
            add_run(tmp.path(), run, "Config name: x\n");
        }
        let stage = ImportStage::new(&config, &store).unwrap();
        assert_eq!(stage.discover(false).unwrap(), vec![100, 101, 102]);

        stage.process_one(101).unwrap();
        assert_eq!(stage.discover(false).unwrap(), vec![100, 102]);
    }

    #[test]
    fn incremental_discovery_respects_watermarks() {
        // With state {contig=102, attempted=110}, filesystem
        // {108..112}, empty store -> only {111, 112} remain.
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        for run in 108u32..=112 {
            add_run(tmp.path(), run, "Config name: x\n");
        }
        let stage = ImportStage::new(&config, &store).unwrap();
        state::write_state(
            &stage.state_file(),
            &StageState {
                last_contiguous_run: 102,
                last_attempted_run: 110,
                pending_runs: BTreeSet::new(),
            },
        )
        .unwrap();

        assert_eq!(stage.discover(true).unwrap(), vec![111, 112]);
        assert_eq!(stage.discover(false).unwrap(), vec![108, 109, 110, 111, 112]);
    }

    #[test]
    fn process_one_inserts_and_applies_stop_time_update() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        add_run(
            tmp.path(),
            42,
            "Config name: beam\nDAQInterface start time: Sat Apr  5 10:00:01 2025\nDAQInterface stop time: Sat Apr  5 11:00:00 2025\n",
        );

        let stage = ImportStage::new(&config, &store).unwrap();
        stage.process_one(42).unwrap();

        assert_eq!(store.resolve_config_name(42).unwrap(), "42/beam");
        let export = tmp.path().join("export");
        store.export(42, &export).unwrap();
        assert!(export.join("metadata.fcl").is_file());
        assert!(export.join("RunHistory.fcl").is_file());
        assert!(export.join("RunHistory2.fcl").is_file());
        assert!(export.join("schema.fcl").is_file());
    }

    #[test]
    fn process_one_without_stop_time_skips_update() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        add_run(tmp.path(), 43, "Config name: x\nDAQInterface start time: t\n");

        let stage = ImportStage::new(&config, &store).unwrap();
        stage.process_one(43).unwrap();

        let export = tmp.path().join("export");
        store.export(43, &export).unwrap();
        assert!(!export.join("RunHistory2.fcl").exists());
    }

    #[test]
    fn missing_run_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        let stage = ImportStage::new(&config, &store).unwrap();
        let err = stage.process_one(999).unwrap_err();
        assert!(err.to_string().contains("run directory not found"), "{err}");
    }

    #[test]
    fn duplicate_import_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        add_run(tmp.path(), 44, "Config name: x\n");

        let stage = ImportStage::new(&config, &store).unwrap();
        stage.process_one(44).unwrap();
        let err = stage.process_one(44).unwrap_err();
        assert!(err.to_string().contains("already archived"), "{err}");
    }

    #[test]
    fn concurrency_follows_store() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let store = FsdbStore::from_uri(&config.configuration_store.uri).unwrap();
        let stage = ImportStage::new(&config, &store).unwrap();
        assert_eq!(stage.max_concurrency(), 1);
    }
}
