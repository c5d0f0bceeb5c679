#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use ethnicity_sync::{
    Config, NameClassifier, Notifier, PipelineError, RecognizedLabels, ReportPayload, Result, SourceCustomer,
};

pub const LABELS: [&str; 5] = ["vietnamese", "chinese", "korean", "indian", "thai"];

/// Answers from a fixed name → label table; unknown names get no label.
#[derive(Clone, Default)]
pub struct LookupClassifier {
    answers: HashMap<String, String>,
    failing: HashSet<String>,
    labels: Vec<String>,
    pub calls: Arc<AtomicU64>,
    pub seen: Arc<Mutex<Vec<String>>>,
    jitter: bool,
}

impl LookupClassifier {
    pub fn new(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers.iter().map(|(n, l)| (n.to_string(), l.to_string())).collect(),
            labels: LABELS.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Delay answers by a name-dependent amount so completions arrive out of order.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameClassifier for LookupClassifier {
    async fn recognized_labels(&self) -> Result<RecognizedLabels> {
        Ok(RecognizedLabels::new(&self.labels))
    }

    async fn classify(&self, name: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(name.to_string());
        if self.jitter {
            let delay = name.bytes().map(u64::from).sum::<u64>() % 7;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.failing.contains(name) {
            return Err(PipelineError::Classifier(format!("no answer for {}", name)));
        }
        Ok(self.answers.get(name).cloned())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(ReportPayload, Vec<String>)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(ReportPayload, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, payload: &ReportPayload, recipients: &[String]) -> Result<()> {
        self.sent.lock().unwrap().push((payload.clone(), recipients.to_vec()));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _payload: &ReportPayload, _recipients: &[String]) -> Result<()> {
        Err(PipelineError::Notification("relay unreachable".into()))
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub fn customer(id: &str, first: &str, last: &str, created: NaiveDateTime) -> SourceCustomer {
    SourceCustomer {
        customer_id: id.to_string(),
        first_name: Some(first.to_string()),
        middle_name: None,
        last_name: Some(last.to_string()),
        created_date: created,
        modified_date: None,
        customer_list_id: 2,
    }
}

/// Defaults with the artifact inside `dir` and a fixed recipient list.
pub fn test_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.staging_artifact_path = dir.join("temp_new_cids.tsv");
    cfg.notify_recipients = vec!["ops@example.com".to_string(), "data@example.com".to_string()];
    cfg.classify_chunk_size = 3;
    cfg
}

pub fn write_artifact(path: &Path, rows: &[(&str, &str)]) {
    let mut body = String::new();
    for (id, name) in rows {
        body.push_str(&format!("{}\t{}\n", id, name));
    }
    std::fs::write(path, body).unwrap();
}
