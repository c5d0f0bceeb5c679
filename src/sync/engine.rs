use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tokio::time::Instant;

use crate::clients::*;
use crate::config::Config;
use crate::models::*;
use crate::storage::WarehouseStore;
use crate::sync::*;

/// Runs the extract → classify → merge → report sequence, one run at a time.
#[derive(Clone)]
pub struct SyncEngine {
    classifier: Arc<dyn NameClassifier>,
    notifier: Arc<dyn Notifier>,
    extractor: StagingExtractor,
    chunked: ChunkedClassifier,
    writer: MergeWriter,
    reporter: RunReporter,
    cfg: Config,
    running: Arc<AtomicBool>,
    last_run: Arc<Mutex<Option<RunExecution>>>,
}

struct ActiveRunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn WarehouseStore>,
        classifier: Arc<dyn NameClassifier>,
        notifier: Arc<dyn Notifier>,
        cfg: Config,
    ) -> Self {
        Self {
            extractor: StagingExtractor::new(store.clone(), cfg.staging_artifact_path.clone()),
            chunked: ChunkedClassifier::new(classifier.clone(), cfg.classify_chunk_size, cfg.classify_parallelism),
            writer: MergeWriter::new(store, cfg.merge_atomic),
            reporter: RunReporter::new(),
            classifier,
            notifier,
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recent run, finished or in flight.
    pub fn last_run(&self) -> Option<RunExecution> {
        self.last_run.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Run for the current business day in the configured UTC offset.
    pub async fn run_now(&self) -> Result<RunExecution> {
        let today = local_date(Utc::now(), self.cfg.utc_offset()?);
        self.run_once(today).await
    }

    /// One full pipeline run for `today`. Fails with [`PipelineError::RunInProgress`]
    /// when another run holds the engine.
    pub async fn run_once(&self, today: NaiveDate) -> Result<RunExecution> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Sync run already in progress; skipping trigger");
            return Err(PipelineError::RunInProgress);
        }
        let _guard = ActiveRunGuard { flag: self.running.clone() };

        let window = RunWindow::for_mode(self.cfg.window_mode()?, today)?;
        let mut exec = RunExecution::new(window.describe(), today.format(ASSIGNED_ON_FORMAT).to_string());
        self.record(&exec);
        tracing::info!(run_id = %exec.id, window = %exec.window, assigned_on = %exec.assigned_on, "Starting sync run");

        // Extract
        let stage_start = Instant::now();
        let handle = match self.extractor.extract(&window).await {
            Ok(h) => h,
            Err(e) => return Err(self.fail_run(&mut exec, RunStage::Extract, e)),
        };
        exec.counters.candidates_counted = handle.counted;
        exec.counters.rows_exported = handle.exported;
        exec.metrics.extract_duration_ms = Some(stage_start.elapsed().as_millis() as i64);

        // Classify
        let stage_start = Instant::now();
        let labels = match self.classifier.recognized_labels().await {
            Ok(l) => l,
            Err(e) => return Err(self.fail_run(&mut exec, RunStage::Classify, e)),
        };
        if labels.is_empty() {
            tracing::warn!(run_id = %exec.id, "Recognized label set is empty; no record can be kept");
        }
        let (results, stats) = match self.chunked.classify(&handle, &labels, today).await {
            Ok(r) => r,
            Err(e) => return Err(self.fail_run(&mut exec, RunStage::Classify, e)),
        };
        exec.counters.rows_read = stats.rows_read;
        exec.counters.rows_malformed = stats.rows_malformed;
        exec.counters.classifier_errors = stats.classifier_errors;
        exec.counters.records_classified = stats.kept;
        exec.metrics.classify_duration_ms = Some(stage_start.elapsed().as_millis() as i64);

        if results.is_empty() {
            tracing::warn!(run_id = %exec.id, "Nothing to upload");
            exec.complete(RunStatus::NothingToUpload);
            self.record(&exec);
            return Ok(exec);
        }

        // Merge
        let stage_start = Instant::now();
        let merged = match self.writer.merge(&results).await {
            Ok(m) => m,
            Err(e) => return Err(self.fail_run(&mut exec, RunStage::Merge, e)),
        };
        exec.counters.temp_rows = merged.temp_rows;
        exec.counters.target_deleted = merged.deleted;
        exec.counters.target_inserted = merged.inserted;
        exec.metrics.merge_duration_ms = Some(stage_start.elapsed().as_millis() as i64);

        // Report; delivery problems never fail the run
        let stage_start = Instant::now();
        if let Some(payload) = self.reporter.report(&results, &window) {
            match self.notifier.send(&payload, &self.cfg.notify_recipients).await {
                Ok(()) => exec.notified = true,
                Err(e) => tracing::error!(run_id = %exec.id, error = %e, "Failed to deliver run report"),
            }
        }
        exec.metrics.report_duration_ms = Some(stage_start.elapsed().as_millis() as i64);

        exec.complete(RunStatus::Success);
        self.record(&exec);
        tracing::info!(
            run_id = %exec.id,
            kept = exec.counters.records_classified,
            deleted = exec.counters.target_deleted,
            inserted = exec.counters.target_inserted,
            notified = exec.notified,
            total_duration_ms = exec.metrics.total_duration_ms.unwrap_or_default(),
            "Sync run completed"
        );
        Ok(exec)
    }

    fn fail_run(&self, exec: &mut RunExecution, stage: RunStage, error: PipelineError) -> PipelineError {
        tracing::error!(run_id = %exec.id, stage = ?stage, error = %error, "Sync run failed");
        exec.fail(stage, error.to_string());
        self.record(exec);
        error
    }

    fn record(&self, exec: &RunExecution) {
        *self.last_run.lock().unwrap_or_else(|p| p.into_inner()) = Some(exec.clone());
    }
}
