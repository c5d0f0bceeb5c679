use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format of the `assigned_on` column in the reporting table.
pub const ASSIGNED_ON_FORMAT: &str = "%d-%m-%Y";

pub const MAX_CUSTOMER_ID_LEN: usize = 20;
pub const MAX_ETHNICITY_LEN: usize = 50;
pub const MAX_FULL_NAME_LEN: usize = 50;

/// A customer selected by the run window, as read back from the staging artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub customer_id: String,
    pub full_name: String,
}

impl CandidateRecord {
    pub fn new(customer_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self { customer_id: customer_id.into(), full_name: full_name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub customer_id: String,
    pub full_name: String,
    pub ethnicity: String,
    pub assigned_on: NaiveDate,
}

impl ClassifiedRecord {
    pub fn assigned_on_text(&self) -> String {
        self.assigned_on.format(ASSIGNED_ON_FORMAT).to_string()
    }

    pub fn to_entry(&self) -> TargetTableEntry {
        TargetTableEntry {
            customer_id: self.customer_id.clone(),
            ethnicity: self.ethnicity.clone(),
            assigned_on: self.assigned_on_text(),
        }
    }
}

/// Row shape shared by the temporary and the permanent reporting tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetTableEntry {
    pub customer_id: String,
    pub ethnicity: String,
    pub assigned_on: String,
}

impl TargetTableEntry {
    pub fn new(customer_id: impl Into<String>, ethnicity: impl Into<String>, assigned_on: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ethnicity: ethnicity.into(),
            assigned_on: assigned_on.into(),
        }
    }
}

/// The finite label vocabulary the classifier is allowed to produce.
///
/// Labels are held lowercase; lookups are case-insensitive. Labels that would not
/// fit the `ethnicity` column are rejected at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedLabels {
    labels: BTreeSet<String>,
}

impl RecognizedLabels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for label in labels {
            let label = label.as_ref().trim().to_lowercase();
            if label.is_empty() {
                continue;
            }
            if label.chars().count() > MAX_ETHNICITY_LEN {
                tracing::warn!(label = %label, "Ignoring label longer than the ethnicity column");
                continue;
            }
            set.insert(label);
        }
        Self { labels: set }
    }

    /// Returns the stored (lowercase) form of `label` if it is recognized.
    pub fn resolve(&self, label: &str) -> Option<&str> {
        let key = label.trim().to_lowercase();
        self.labels.get(&key).map(|s| s.as_str())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.resolve(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|s| s.as_str())
    }
}

/// Classified records accumulated over a run.
///
/// Each chunk yields its own `ResultSet`; the run result is the fold of those
/// partials with [`ResultSet::concat`], so chunk boundaries never leak downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    records: Vec<ClassifiedRecord>,
}

impl ResultSet {
    pub fn new(records: Vec<ClassifiedRecord>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn concat(mut self, other: ResultSet) -> Self {
        self.records.extend(other.records);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ClassifiedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ClassifiedRecord> {
        self.records
    }

    /// (customer_id, ethnicity) pairs, order-insensitive.
    pub fn id_label_pairs(&self) -> BTreeSet<(String, String)> {
        self.records
            .iter()
            .map(|r| (r.customer_id.clone(), r.ethnicity.clone()))
            .collect()
    }

    /// One record per customer id, at the id's first position; a later record wins over an earlier one.
    pub fn deduplicated(&self) -> ResultSet {
        let mut position: HashMap<&str, usize> = HashMap::new();
        let mut records: Vec<ClassifiedRecord> = Vec::with_capacity(self.records.len());
        for record in &self.records {
            match position.get(record.customer_id.as_str()) {
                Some(&idx) => records[idx] = record.clone(),
                None => {
                    position.insert(record.customer_id.as_str(), records.len());
                    records.push(record.clone());
                }
            }
        }
        ResultSet { records }
    }

    /// Target rows for [`ResultSet::deduplicated`].
    pub fn to_entries(&self) -> Vec<TargetTableEntry> {
        self.deduplicated().records.iter().map(|r| r.to_entry()).collect()
    }
}

/// Collapse runs of whitespace and trim; the staging artifact pads missing name parts with spaces.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the staging `name` column from its parts: missing parts become empty,
/// parts are space-joined and the result is cut at [`MAX_FULL_NAME_LEN`] characters.
pub fn compose_full_name(first: Option<&str>, middle: Option<&str>, last: Option<&str>) -> String {
    let joined = format!("{} {} {}", first.unwrap_or(""), middle.unwrap_or(""), last.unwrap_or(""));
    staging_safe_text(&joined).chars().take(MAX_FULL_NAME_LEN).collect()
}

/// Replace the characters that would break a one-line-per-row artifact
/// (tab, CR, LF, and the backslash a text `COPY` escapes) with spaces.
pub fn staging_safe_text(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '\t' | '\r' | '\n' | '\\') { ' ' } else { c })
        .collect()
}
