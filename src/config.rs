use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::models::{parse_utc_offset, PipelineError, Result, WindowMode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableNames {
    pub source: String,
    pub staging: String,
    pub temp: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub tables: TableNames,
    pub customer_list_id: i32,
    pub sync_window: String,
    pub sync_window_days: u32,
    pub run_utc_offset: String,
    pub staging_artifact_path: PathBuf,
    pub classify_chunk_size: usize,
    pub classify_parallelism: usize,
    pub merge_atomic: bool,
    pub classifier_url: String,
    // Overrides the label list served by the classifier when set
    pub recognized_labels: Option<Vec<String>>,
    pub http_timeout_ms: u64,
    pub http_user_agent: String,
    pub http_max_retries: u32,
    pub http_retry_backoff_ms: u64,
    pub notify_webhook_url: Option<String>,
    pub notify_recipients: Vec<String>,
    pub enable_scheduler: bool,
    pub sync_cron: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
    let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

    let port: u16 = get("PORT").and_then(|s| s.parse().ok()).unwrap_or(8091);
    let database_url = get("DATABASE_URL").unwrap_or_else(|| "postgres://localhost:5432/warehouse".to_string());
    let database_max_connections: u32 = get("DATABASE_MAX_CONNECTIONS").and_then(|s| s.parse().ok()).unwrap_or(5);
    let tables = TableNames {
        source: get("SOURCE_TABLE").unwrap_or_else(|| "public.customers".to_string()),
        staging: get("STAGING_TABLE").unwrap_or_else(|| "public.temp_new_cids".to_string()),
        temp: get("TEMP_TABLE").unwrap_or_else(|| "public.tmp_ethnicities".to_string()),
        target: get("TARGET_TABLE").unwrap_or_else(|| "public.customer_ethnicities".to_string()),
    };
    let customer_list_id: i32 = get("CUSTOMER_LIST_ID").and_then(|s| s.parse().ok()).unwrap_or(2);
    let sync_window = get("SYNC_WINDOW").unwrap_or_else(|| "before_today".to_string());
    let sync_window_days: u32 = get("SYNC_WINDOW_DAYS").and_then(|s| s.parse().ok()).unwrap_or(7);
    // The reporting business day is Sydney's
    let run_utc_offset = get("RUN_UTC_OFFSET").unwrap_or_else(|| "+10:00".to_string());
    let staging_artifact_path = get("STAGING_ARTIFACT_PATH").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("temp_new_cids.tsv"));
    let classify_chunk_size: usize = get("CLASSIFY_CHUNK_SIZE").and_then(|s| s.parse().ok()).unwrap_or(20_000);
    let classify_parallelism: usize = get("CLASSIFY_PARALLELISM").and_then(|s| s.parse().ok()).unwrap_or(4);
    let merge_atomic: bool = get("MERGE_ATOMIC").and_then(|s| s.parse().ok()).unwrap_or(true);
    let classifier_url = get("CLASSIFIER_URL").unwrap_or_else(|| "http://localhost:8095".to_string());
    let recognized_labels = get("RECOGNIZED_LABELS").map(|s| split_list(&s, ','));
    let http_timeout_ms: u64 = get("HTTP_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(60000);
    let http_user_agent = get("HTTP_USER_AGENT").unwrap_or_else(|| "ethnicity-sync/0.1".to_string());
    let http_max_retries: u32 = get("HTTP_MAX_RETRIES").and_then(|s| s.parse().ok()).unwrap_or(3);
    let http_retry_backoff_ms: u64 = get("HTTP_RETRY_BACKOFF_MS").and_then(|s| s.parse().ok()).unwrap_or(500);
    let notify_webhook_url = get("NOTIFY_WEBHOOK_URL");
    let notify_recipients = get("NOTIFY_RECIPIENTS").map(|s| split_list(&s, ';')).unwrap_or_default();
    let enable_scheduler: bool = get("ENABLE_SCHEDULER").and_then(|s| s.parse().ok()).unwrap_or(true);
    // 17:10 at UTC+10
    let sync_cron = get("SYNC_CRON").unwrap_or_else(|| "0 10 7 * * *".to_string());

        Self {
            port,
            database_url,
            database_max_connections,
            tables,
            customer_list_id,
            sync_window,
            sync_window_days,
            run_utc_offset,
            staging_artifact_path,
            classify_chunk_size,
            classify_parallelism,
            merge_atomic,
            classifier_url,
            recognized_labels,
            http_timeout_ms,
            http_user_agent,
            http_max_retries,
            http_retry_backoff_ms,
            notify_webhook_url,
            notify_recipients,
            enable_scheduler,
            sync_cron,
        }
    }

    pub fn window_mode(&self) -> Result<WindowMode> {
        WindowMode::parse(&self.sync_window, self.sync_window_days)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.run_utc_offset)
    }

    pub fn schedule(&self) -> Result<cron::Schedule> {
        cron::Schedule::from_str(&self.sync_cron)
            .map_err(|e| PipelineError::Configuration(format!("Invalid SYNC_CRON '{}': {}", self.sync_cron, e)))
    }

    /// Check everything that is parsed lazily, so a bad setting fails at startup instead of mid-run.
    pub fn validate(&self) -> Result<()> {
        self.window_mode()?;
        self.utc_offset()?;
        self.schedule()?;
        for name in [&self.tables.source, &self.tables.staging, &self.tables.temp, &self.tables.target] {
            validate_identifier(name)?;
        }
        let distinct: std::collections::HashSet<&String> =
            [&self.tables.staging, &self.tables.temp, &self.tables.target].into_iter().collect();
        if distinct.len() != 3 {
            return Err(PipelineError::Configuration(
                "STAGING_TABLE, TEMP_TABLE and TARGET_TABLE must be distinct".into(),
            ));
        }
        if self.classify_chunk_size == 0 {
            return Err(PipelineError::Configuration("CLASSIFY_CHUNK_SIZE must be at least 1".into()));
        }
        if self.classify_parallelism == 0 {
            return Err(PipelineError::Configuration("CLASSIFY_PARALLELISM must be at least 1".into()));
        }
        Ok(())
    }
}

/// Table names are spliced into DDL, so only plain (optionally schema-qualified) identifiers pass.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && !part.starts_with(|c: char| c.is_ascii_digit())
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(PipelineError::Configuration(format!("Invalid table name '{}'", name)));
    }
    Ok(())
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
