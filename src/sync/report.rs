use std::collections::BTreeMap;
use std::fmt::Write as _;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::*;

const SUMMARY_HEADER: &str = "-- new ethnic customer ids captured:";
const SAMPLE_HEADER: &str = "-- sample:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub customer_id: String,
    pub full_name: String,
    pub ethnicity: String,
}

/// Human-readable digest of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub subject: String,
    pub summary: String,
    pub counts: Vec<LabelCount>,
    pub sample: Vec<SampleRow>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunReporter;

impl RunReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn report(&self, results: &ResultSet, window: &RunWindow) -> Option<ReportPayload> {
        self.report_with_rng(results, window, &mut rand::thread_rng())
    }

    /// Same as [`RunReporter::report`] with a caller-supplied sampling source.
    pub fn report_with_rng<R: Rng + ?Sized>(
        &self,
        results: &ResultSet,
        window: &RunWindow,
        rng: &mut R,
    ) -> Option<ReportPayload> {
        if results.is_empty() {
            return None;
        }
        // Count what the merge writes: one row per customer
        let results = results.deduplicated();

        let mut groups: BTreeMap<&str, Vec<&ClassifiedRecord>> = BTreeMap::new();
        for record in results.records() {
            groups.entry(record.ethnicity.as_str()).or_default().push(record);
        }

        let mut counts: Vec<LabelCount> = groups
            .iter()
            .map(|(label, members)| LabelCount { label: label.to_string(), count: members.len() as u64 })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));

        let mut sample = Vec::new();
        for count in &counts {
            let Some(members) = groups.get(count.label.as_str()) else { continue };
            let size = if members.len() > 2 { 3 } else { 1 };
            for record in members.choose_multiple(rng, size) {
                sample.push(SampleRow {
                    customer_id: record.customer_id.clone(),
                    full_name: record.full_name.clone(),
                    ethnicity: record.ethnicity.clone(),
                });
            }
        }

        let summary = render_summary(&counts);
        let body = format!("{}\n{}", summary, render_sample(&sample));
        Some(ReportPayload {
            subject: format!("ethnicities: customers created or modified {}", window.describe()),
            summary,
            counts,
            sample,
            body,
        })
    }
}

fn render_summary(counts: &[LabelCount]) -> String {
    let mut out = format!("{}\n\n", SUMMARY_HEADER);
    for c in counts {
        let _ = writeln!(out, "{}: {}", c.label.to_uppercase(), c.count);
    }
    out
}

fn render_sample(rows: &[SampleRow]) -> String {
    let mut out = format!("{}\n\n", SAMPLE_HEADER);
    let _ = writeln!(out, "{:<12} {:<30} {:<20}", "CustomerID", "FullName", "Ethnicity");
    for row in rows {
        let _ = writeln!(
            out,
            "{:<12} {:<30} {:<20}",
            row.customer_id.trim(),
            row.full_name.trim(),
            row.ethnicity.trim()
        );
    }
    out
}
