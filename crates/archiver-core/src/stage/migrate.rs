//! Migrate stage: configuration store into the archive store.
//!
//! Each run is exported, packed into a text blob and uploaded. With
//! validation enabled the blob is spot-checked before upload and compared
//! by MD5 digest against the stored copy afterwards.

use std::collections::BTreeSet;
use std::path::PathBuf;

use md5::{Digest, Md5};
use tracing::{debug, info};

use crate::archive::ArchiveStore;
use crate::blob;
use crate::blob::validate::BlobValidator;
use crate::config::Config;
use crate::error::{ArchiverError, Result};
use crate::metrics::MetricsClient;
use crate::state;
use crate::store::ConfigStore;

use super::Stage;

pub struct MigrateStage<'a> {
    config: &'a Config,
    store: &'a dyn ConfigStore,
    archive: &'a dyn ArchiveStore,
    validator: Option<BlobValidator>,
    metrics: MetricsClient,
}

impl<'a> MigrateStage<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn ConfigStore,
        archive: &'a dyn ArchiveStore,
        validate: bool,
        metrics: MetricsClient,
    ) -> MigrateStage<'a> {
        MigrateStage {
            config,
            store,
            archive,
            validator: validate.then(BlobValidator::default),
            metrics,
        }
    }
}

impl Stage for MigrateStage<'_> {
    fn name(&self) -> &'static str {
        "Migration"
    }

    fn state_file(&self) -> PathBuf {
        self.config.app.migrate_state_file()
    }

    fn failure_log(&self) -> PathBuf {
        self.config.app.migrate_failure_log()
    }

    fn discover(&self, incremental: bool) -> Result<Vec<u32>> {
        info!(
            "Migration stage: fetching runs (mode: {})",
            if incremental { "incremental" } else { "full" }
        );
        let archived = self.store.list_runs()?;
        let uploaded = self.archive.list_runs()?;
        let mut candidates: BTreeSet<u32> = archived.difference(&uploaded).copied().collect();

        if incremental {
            let start = state::incremental_start(&self.state_file());
            candidates.retain(|&r| r > start);
        }

        info!("Migration stage: found {} runs to migrate", candidates.len());
        Ok(candidates.into_iter().collect())
    }

    fn process_one(&self, run_number: u32) -> Result<()> {
        let export_dir = tempfile::Builder::new()
            .prefix(&format!("migrator_{run_number}_"))
            .tempdir()?;

        // The driver transport qualifies names as `<run>/<config>`.
        let full_name = self.store.resolve_config_name(run_number)?;
        let config_name = full_name
            .strip_prefix(&format!("{run_number}/"))
            .unwrap_or(&full_name);
        debug!("Run {run_number}: migrating configuration '{config_name}'");

        self.store.export(run_number, export_dir.path())?;
        let generated_blob = blob::pack(run_number, export_dir.path())?;

        if let Some(validator) = &self.validator {
            let (error_count, results) = validator.validate(&generated_blob, run_number);
            if error_count > 0 {
                return Err(ArchiverError::Verification(format!(
                    "run {run_number}: blob validation found {error_count} errors: {results:?}"
                )));
            }
        }

        let version = self.archive.upload(run_number, &generated_blob)?;
        info!("Run {run_number}: uploaded blob to archive store (version '{version}')");

        if self.validator.is_some() {
            let downloaded_blob = self.archive.download(run_number)?;
            let generated_md5 = hex::encode(Md5::digest(generated_blob.as_bytes()));
            let downloaded_md5 = hex::encode(Md5::digest(downloaded_blob.as_bytes()));
            if generated_md5 != downloaded_md5 {
                return Err(ArchiverError::Verification(format!(
                    "run {run_number}: MD5 mismatch between generated ({generated_md5}) and \
                     downloaded ({downloaded_md5}) blobs"
                )));
            }
            info!("Run {run_number}: data verification successful");
        }
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        self.store.max_concurrency()
    }

    fn after_batch(&self, processed: usize, successful: &BTreeSet<u32>) {
        if !self.metrics.enabled() {
            return;
        }
        self.metrics
            .post_metric("migrate.runs_processed", processed as f64);
        self.metrics
            .post_metric("migrate.runs_successful", successful.len() as f64);
        self.metrics
            .post_metric("migrate.runs_failed", (processed - successful.len()) as f64);
        if let Some(&max_run) = successful.iter().next_back() {
            self.metrics
                .post_metric("migrate.last_successful_run", max_run as f64);
        }
    }
}
