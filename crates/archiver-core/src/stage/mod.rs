//! The stage engine: discover work, process it on a bounded worker pool
//! with per-run retries, then flush watermarks and failure logs.
//!
//! The two concrete stages (import, migrate) supply only the hooks; the
//! engine owns concurrency, retry policy, cancellation and state tracking
//! so the stages cannot drift apart in those behaviors.

pub mod import;
pub mod migrate;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{AppConfig, ReportingConfig};
use crate::error::{ArchiverError, Result};
use crate::notify;
use crate::shutdown;
use crate::state;

const PROGRESS_REPORT_INTERVAL: usize = 10;

/// Hooks a concrete stage provides to the engine.
pub trait Stage: Sync {
    fn name(&self) -> &'static str;
    fn state_file(&self) -> PathBuf;
    fn failure_log(&self) -> PathBuf;

    /// Run numbers that still need processing, ascending.
    fn discover(&self, incremental: bool) -> Result<Vec<u32>>;

    /// Process one run end to end. Errors are classified by
    /// [`ArchiverError::is_retryable`].
    fn process_one(&self, run_number: u32) -> Result<()>;

    /// Concurrency cap imposed by the stage's backing store.
    fn max_concurrency(&self) -> usize {
        usize::MAX
    }

    /// Called after every batch (including an empty discovery) with the
    /// attempted count and the successful set.
    fn after_batch(&self, _processed: usize, _successful: &BTreeSet<u32>) {}
}

struct BatchOutcome {
    successful: BTreeSet<u32>,
    failed: BTreeSet<u32>,
    cancelled: BTreeSet<u32>,
}

enum RunOutcome {
    Success(u32),
    Failure(u32),
    Cancelled(u32),
}

pub struct StageEngine<'a, S: Stage> {
    stage: &'a S,
    app: &'a AppConfig,
    reporting: &'a ReportingConfig,
}

impl<'a, S: Stage> StageEngine<'a, S> {
    pub fn new(stage: &'a S, app: &'a AppConfig, reporting: &'a ReportingConfig) -> Self {
        StageEngine {
            stage,
            app,
            reporting,
        }
    }

    /// Discover and process one batch of work. Returns `Ok(true)` when
    /// every processed run succeeded and no shutdown was requested.
    pub fn run(&self, incremental: bool) -> Result<bool> {
        let name = self.stage.name();
        let runs = self.stage.discover(incremental).map_err(|e| {
            error!("{name} stage: failed to determine runs to process: {e}");
            e
        })?;
        if runs.is_empty() {
            info!("{name} stage: no runs to process");
            self.stage.after_batch(0, &BTreeSet::new());
            return Ok(true);
        }

        let batch = &runs[..runs.len().min(self.app.batch_size)];
        if batch.len() < runs.len() {
            info!(
                "{name} stage: {} runs pending, processing batch of {}",
                runs.len(),
                batch.len()
            );
        } else {
            info!("{name} stage: processing batch of {} runs", batch.len());
        }

        let outcome = self.process_batch(batch)?;
        if !outcome.successful.is_empty() {
            state::advance_contiguous(&self.stage.state_file(), &outcome.successful)?;
        }
        self.stage.after_batch(batch.len(), &outcome.successful);
        Ok(outcome.failed.is_empty() && !shutdown::shutdown_requested())
    }

    /// Re-process the runs recorded in the failure log. The log is cleared
    /// up front; runs that fail again are re-appended by the batch.
    pub fn run_failure_recovery(&self) -> Result<bool> {
        let name = self.stage.name();
        let failure_log = self.stage.failure_log();
        let failed_runs: BTreeSet<u32> =
            state::parse_failure_log(&failure_log).into_iter().collect();
        if failed_runs.is_empty() {
            info!("{name} stage: no failed runs to retry");
            return Ok(true);
        }

        info!(
            "{name} stage: retrying {} failed runs from {}",
            failed_runs.len(),
            failure_log.display()
        );
        state::write_failures(&failure_log, &BTreeSet::new())?;

        let runs: Vec<u32> = failed_runs.into_iter().collect();
        let outcome = self.process_batch(&runs)?;
        if !outcome.successful.is_empty() {
            state::advance_contiguous(&self.stage.state_file(), &outcome.successful)?;
        }
        info!(
            "{name} stage: recovery complete ({} recovered, {} still failing)",
            outcome.successful.len(),
            outcome.failed.len()
        );
        Ok(outcome.failed.is_empty() && !shutdown::shutdown_requested())
    }

    /// Process a set of runs on the worker pool. Pool size is the
    /// configured worker count clamped to what the stage's store tolerates.
    fn process_batch(&self, runs: &[u32]) -> Result<BatchOutcome> {
        let name = self.stage.name();
        let total = runs.len();
        let workers = self
            .app
            .parallel_workers
            .min(self.stage.max_concurrency())
            .max(1);
        info!("{name} stage: starting parallel processing of {total} runs with {workers} workers");

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<u32>();
        for &run in runs {
            task_tx.send(run).expect("queueing run");
        }
        drop(task_tx);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<RunOutcome>();

        let mut successful = BTreeSet::new();
        let mut failed = BTreeSet::new();
        let mut cancelled = BTreeSet::new();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for run in task_rx.iter() {
                        // Consult the flag between runs only; a run in
                        // flight always completes.
                        let outcome = if shutdown::shutdown_requested() {
                            RunOutcome::Cancelled(run)
                        } else if self.process_run_with_retry(run) {
                            RunOutcome::Success(run)
                        } else {
                            RunOutcome::Failure(run)
                        };
                        if result_tx.send(outcome).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut completed = 0usize;
            let mut shutdown_logged = false;
            for outcome in result_rx.iter() {
                match outcome {
                    RunOutcome::Success(run) => {
                        successful.insert(run);
                        completed += 1;
                    }
                    RunOutcome::Failure(run) => {
                        failed.insert(run);
                        completed += 1;
                    }
                    RunOutcome::Cancelled(run) => {
                        cancelled.insert(run);
                        continue;
                    }
                }
                if completed % PROGRESS_REPORT_INTERVAL == 0 || completed == total {
                    info!(
                        "Progress: {completed}/{total} runs processed ({} successful, {} failed)",
                        successful.len(),
                        failed.len()
                    );
                }
                if shutdown::shutdown_requested() && !shutdown_logged {
                    shutdown_logged = true;
                    warn!(
                        "{name} stage: shutdown requested - pending runs will be cancelled, \
                         in-progress runs will complete"
                    );
                }
            }
        });

        if cancelled.is_empty() {
            info!(
                "{name} stage: batch complete ({} successful, {} failed)",
                successful.len(),
                failed.len()
            );
        } else {
            info!(
                "{name} stage: batch interrupted by shutdown ({} successful, {} failed, {} not processed)",
                successful.len(),
                failed.len(),
                cancelled.len()
            );
        }

        // Cancelled runs were never started and count as not-attempted.
        let attempted: BTreeSet<u32> = successful.union(&failed).copied().collect();
        state::advance_attempted(&self.stage.state_file(), &attempted)?;

        if !failed.is_empty() {
            warn!(
                "{name} stage: recording {} failed runs to failure log",
                failed.len()
            );
            state::append_failures(&self.stage.failure_log(), &failed)?;
            notify::send_failure_report(&failed, self.reporting, &name.to_lowercase());
        }

        Ok(BatchOutcome {
            successful,
            failed,
            cancelled,
        })
    }

    /// Outer retry loop around a single run. A permanent skip
    /// short-circuits; other errors retry up to the configured attempt
    /// count with a fixed delay between attempts.
    fn process_run_with_retry(&self, run_number: u32) -> bool {
        let name = self.stage.name();
        let retries = self.app.run_process_retries;
        for attempt in 0..=retries {
            info!(
                "{name} stage: processing run {run_number} (attempt {}/{})",
                attempt + 1,
                retries + 1
            );
            match self.stage.process_one(run_number) {
                Ok(()) => {
                    info!("{name} stage: run {run_number} processed successfully");
                    return true;
                }
                Err(e @ ArchiverError::PermanentSkip { .. }) => {
                    error!("{name} stage: run {run_number} permanently failed: {e}");
                    return false;
                }
                Err(e) if e.is_retryable() && attempt < retries => {
                    error!(
                        "{name} stage: run {run_number} failed (attempt {}/{}): {e}",
                        attempt + 1,
                        retries + 1
                    );
                    let delay = self.app.retry_delay_seconds;
                    info!("Retrying run {run_number} in {delay} seconds");
                    std::thread::sleep(Duration::from_secs(delay));
                }
                Err(e) => {
                    error!(
                        "{name} stage: run {run_number} failed (attempt {}/{}): {e}",
                        attempt + 1,
                        retries + 1
                    );
                    return false;
                }
            }
        }
        false
    }
}
