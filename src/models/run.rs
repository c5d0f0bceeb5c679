use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    NothingToUpload,
    Failed,
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStage {
    Extract,
    Classify,
    Merge,
    Report,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounters {
    pub candidates_counted: u64,
    pub rows_exported: u64,
    pub rows_read: u64,
    pub rows_malformed: u64,
    pub classifier_errors: u64,
    pub records_classified: u64,
    pub temp_rows: u64,
    pub target_deleted: u64,
    pub target_inserted: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub extract_duration_ms: Option<i64>,
    pub classify_duration_ms: Option<i64>,
    pub merge_duration_ms: Option<i64>,
    pub report_duration_ms: Option<i64>,
    pub total_duration_ms: Option<i64>,
    pub records_per_second: Option<f64>,
}

/// Book-keeping for a single pipeline run; the latest one is served on `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExecution {
    pub id: Uuid,
    pub window: String,
    pub assigned_on: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub metrics: RunMetrics,
    pub failure: Option<RunFailure>,
    pub notified: bool,
}

impl RunExecution {
    pub fn new(window: String, assigned_on: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            window,
            assigned_on,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            counters: RunCounters::default(),
            metrics: RunMetrics::default(),
            failure: None,
            notified: false,
        }
    }

    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.calculate_final_metrics();
    }

    pub fn fail(&mut self, stage: RunStage, message: String) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.failure = Some(RunFailure { stage, message, timestamp: Utc::now() });
        self.calculate_final_metrics();
    }

    fn calculate_final_metrics(&mut self) {
        if let Some(completed) = self.completed_at {
            let duration = (completed - self.started_at).num_milliseconds();
            self.metrics.total_duration_ms = Some(duration);
            if duration > 0 && self.counters.rows_read > 0 {
                self.metrics.records_per_second =
                    Some(self.counters.rows_read as f64 / (duration as f64 / 1000.0));
            }
        }
    }
}

/// Outcome of the merge-replace into the reporting table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeReport {
    pub uploaded: bool,
    pub expected_rows: u64,
    pub temp_rows: u64,
    pub count_mismatch: bool,
    pub deleted: u64,
    pub inserted: u64,
}

impl MergeReport {
    pub fn nothing_to_upload() -> Self {
        Self::default()
    }
}
