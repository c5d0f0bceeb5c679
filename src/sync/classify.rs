use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::clients::NameClassifier;
use crate::handlers::StagingChunks;
use crate::models::*;
use crate::sync::StagingHandle;

// Ids listed in the per-chunk classifier error warning
const ERROR_SAMPLE_IDS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyStats {
    pub chunks: u64,
    pub rows_read: u64,
    pub rows_malformed: u64,
    pub classifier_errors: u64,
    /// Empty name or no answer from the classifier.
    pub unlabeled: u64,
    /// Answer outside the recognized label set.
    pub unrecognized: u64,
    pub kept: u64,
}

// Per-record result, tagged with its position inside the chunk
struct Outcome {
    index: usize,
    customer_id: String,
    full_name: String,
    label: Result<Option<String>>,
}

// File reads run on the blocking pool, off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Staging(format!("Artifact reader task failed: {}", e)))?
}

/// Streams the staging artifact chunk by chunk and keeps the records whose
/// classification is a recognized label.
#[derive(Clone)]
pub struct ChunkedClassifier {
    classifier: Arc<dyn NameClassifier>,
    chunk_size: usize,
    parallelism: usize,
}

impl ChunkedClassifier {
    pub fn new(classifier: Arc<dyn NameClassifier>, chunk_size: usize, parallelism: usize) -> Self {
        Self { classifier, chunk_size: chunk_size.max(1), parallelism: parallelism.max(1) }
    }

    pub async fn classify(
        &self,
        handle: &StagingHandle,
        labels: &RecognizedLabels,
        assigned_on: NaiveDate,
    ) -> Result<(ResultSet, ClassifyStats)> {
        let start = Instant::now();
        let path = handle.artifact_path.clone();
        let chunk_size = self.chunk_size;
        let mut chunks = blocking(move || StagingChunks::open(&path, chunk_size)).await?;
        let mut stats = ClassifyStats::default();
        let mut results = ResultSet::empty();

        loop {
            let (reader, next) = blocking(move || {
                let next = chunks.next_chunk();
                Ok((chunks, next))
            })
            .await?;
            chunks = reader;
            let Some(chunk) = next? else { break };

            stats.chunks += 1;
            let processed = chunk.len();
            let partial = self.classify_chunk(chunk, labels, assigned_on, &mut stats).await;
            tracing::info!(
                chunk = stats.chunks,
                processed,
                kept = partial.len(),
                skipped = processed - partial.len(),
                "Classified chunk"
            );
            results = results.concat(partial);
        }

        stats.rows_read = chunks.rows_read();
        stats.rows_malformed = chunks.malformed();
        stats.kept = results.len() as u64;
        if stats.rows_malformed > 0 {
            tracing::warn!(malformed = stats.rows_malformed, "Skipped malformed staging rows");
        }
        if stats.rows_read != handle.exported {
            tracing::warn!(read = stats.rows_read, exported = handle.exported, "Artifact row count differs from export count");
        }
        tracing::info!(
            rows_read = stats.rows_read,
            kept = stats.kept,
            unlabeled = stats.unlabeled,
            unrecognized = stats.unrecognized,
            classifier_errors = stats.classifier_errors,
            duration_ms = start.elapsed().as_millis() as u64,
            "Classification complete"
        );
        Ok((results, stats))
    }

    /// Classify one chunk with bounded fan-out; the partial keeps artifact order.
    async fn classify_chunk(
        &self,
        chunk: Vec<CandidateRecord>,
        labels: &RecognizedLabels,
        assigned_on: NaiveDate,
        stats: &mut ClassifyStats,
    ) -> ResultSet {
        let mut outcomes: Vec<Outcome> = stream::iter(chunk.into_iter().enumerate())
            .map(|(index, candidate)| {
                let classifier = self.classifier.clone();
                async move {
                    let full_name = normalize_name(&candidate.full_name);
                    let label = if full_name.is_empty() {
                        Ok(None)
                    } else {
                        classifier.classify(&full_name).await
                    };
                    Outcome { index, customer_id: candidate.customer_id, full_name, label }
                }
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.index);

        let mut kept = Vec::new();
        let mut failed_ids: Vec<String> = Vec::new();
        let mut first_error: Option<String> = None;
        for outcome in outcomes {
            match outcome.label {
                Err(e) => {
                    stats.classifier_errors += 1;
                    if failed_ids.len() < ERROR_SAMPLE_IDS {
                        failed_ids.push(outcome.customer_id);
                    }
                    first_error.get_or_insert_with(|| e.to_string());
                }
                Ok(None) => stats.unlabeled += 1,
                Ok(Some(label)) => match labels.resolve(&label) {
                    Some(ethnicity) => kept.push(ClassifiedRecord {
                        customer_id: outcome.customer_id,
                        full_name: outcome.full_name,
                        ethnicity: ethnicity.to_string(),
                        assigned_on,
                    }),
                    None => stats.unrecognized += 1,
                },
            }
        }

        if let Some(error) = first_error {
            tracing::warn!(
                sample_ids = ?failed_ids,
                error = %error,
                "Classifier failed for some records; skipping them"
            );
        }
        ResultSet::new(kept)
    }
}
