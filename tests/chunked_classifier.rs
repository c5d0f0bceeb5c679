mod common;

use std::sync::Arc;

use common::*;
use ethnicity_sync::{ChunkedClassifier, RecognizedLabels, ResultSet, StagingHandle};

fn handle_for(path: &std::path::Path, rows: u64) -> StagingHandle {
    StagingHandle { artifact_path: path.to_path_buf(), counted: rows, exported: rows }
}

async fn run(classifier: LookupClassifier, handle: &StagingHandle, chunk_size: usize, parallelism: usize) -> ResultSet {
    let labels = RecognizedLabels::new(LABELS);
    let chunked = ChunkedClassifier::new(Arc::new(classifier), chunk_size, parallelism);
    let (results, _) = chunked.classify(handle, &labels, date(2024, 1, 2)).await.unwrap();
    results
}

#[tokio::test]
async fn test_mixed_artifact_keeps_only_labelled_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.tsv");
    write_artifact(&path, &[("1001", "Nguyen Van An"), ("1002", "John Smith"), ("1003", "")]);

    let classifier = LookupClassifier::new(&[("Nguyen Van An", "vietnamese")]);
    let chunked = ChunkedClassifier::new(Arc::new(classifier.clone()), 20_000, 4);
    let (results, stats) = chunked
        .classify(&handle_for(&path, 3), &RecognizedLabels::new(LABELS), date(2024, 1, 2))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let record = &results.records()[0];
    assert_eq!(record.customer_id, "1001");
    assert_eq!(record.ethnicity, "vietnamese");
    assert_eq!(record.assigned_on_text(), "02-01-2024");
    assert_eq!(stats.unlabeled, 2);
    // The empty name is never sent out
    assert_eq!(classifier.calls(), 2);
}

#[tokio::test]
async fn test_result_is_independent_of_chunk_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.tsv");
    let names: Vec<(String, String)> = (0..45)
        .map(|i| (format!("{}", 5000 + i), format!("Person Number {}", i)))
        .collect();
    let rows: Vec<(&str, &str)> = names.iter().map(|(id, n)| (id.as_str(), n.as_str())).collect();
    write_artifact(&path, &rows);

    let answers: Vec<(String, String)> = names
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 4 != 3)
        .map(|(i, (_, n))| (n.clone(), LABELS[i % LABELS.len()].to_string()))
        .collect();
    let answer_refs: Vec<(&str, &str)> = answers.iter().map(|(n, l)| (n.as_str(), l.as_str())).collect();
    let handle = handle_for(&path, 45);

    let baseline = run(LookupClassifier::new(&answer_refs).with_jitter(), &handle, 1, 1).await;
    assert!(!baseline.is_empty());
    for chunk_size in [7, 20_000] {
        let other = run(LookupClassifier::new(&answer_refs).with_jitter(), &handle, chunk_size, 8).await;
        assert_eq!(other.id_label_pairs(), baseline.id_label_pairs(), "chunk size {}", chunk_size);
        // Fan-out inside a chunk must not reorder records either
        assert_eq!(other, baseline, "chunk size {}", chunk_size);
    }
}

#[tokio::test]
async fn test_unrecognized_labels_never_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.tsv");
    write_artifact(&path, &[("1", "Kim Min Jun"), ("2", "Olaf Berg"), ("3", "Li Wei")]);

    let classifier = LookupClassifier::new(&[("Kim Min Jun", "KOREAN"), ("Olaf Berg", "nordic"), ("Li Wei", "chinese")]);
    let chunked = ChunkedClassifier::new(Arc::new(classifier), 2, 2);
    let labels = RecognizedLabels::new(LABELS);
    let (results, stats) = chunked.classify(&handle_for(&path, 3), &labels, date(2024, 1, 2)).await.unwrap();

    assert_eq!(stats.unrecognized, 1);
    assert!(results.records().iter().all(|r| labels.contains(&r.ethnicity)));
    let ids: Vec<&str> = results.records().iter().map(|r| r.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3"]);
    // Stored lowercase
    assert_eq!(results.records()[0].ethnicity, "korean");
}

#[tokio::test]
async fn test_classifier_error_skips_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.tsv");
    write_artifact(&path, &[("1", "Tran Thi Mai"), ("2", "Broken Name"), ("3", "Arjun Patel")]);

    let classifier = LookupClassifier::new(&[("Tran Thi Mai", "vietnamese"), ("Arjun Patel", "indian")])
        .failing_on("Broken Name");
    let chunked = ChunkedClassifier::new(Arc::new(classifier), 20_000, 4);
    let (results, stats) = chunked
        .classify(&handle_for(&path, 3), &RecognizedLabels::new(LABELS), date(2024, 1, 2))
        .await
        .unwrap();

    assert_eq!(stats.classifier_errors, 1);
    assert_eq!(results.len(), 2);
    assert!(results.records().iter().all(|r| r.customer_id != "2"));
}

#[tokio::test]
async fn test_malformed_rows_counted_and_names_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staging.tsv");
    let overlong_id = "9".repeat(21);
    std::fs::write(
        &path,
        format!(
            "1\tSok  Dara \nonly-one-column\n2\ttoo\tmany\n{}\tToo Long Id\n\tNo Id\n3\t\"Pham, Quoc Bao\"\n",
            overlong_id
        ),
    )
    .unwrap();

    let classifier = LookupClassifier::new(&[("Sok Dara", "thai"), ("Pham, Quoc Bao", "vietnamese")]);
    let chunked = ChunkedClassifier::new(Arc::new(classifier), 2, 1);
    let (results, stats) = chunked
        .classify(&handle_for(&path, 6), &RecognizedLabels::new(LABELS), date(2024, 1, 2))
        .await
        .unwrap();

    assert_eq!(stats.rows_read, 6);
    assert_eq!(stats.rows_malformed, 4);
    let pairs: Vec<(&str, &str)> = results
        .records()
        .iter()
        .map(|r| (r.customer_id.as_str(), r.full_name.as_str()))
        .collect();
    assert_eq!(pairs, vec![("1", "Sok Dara"), ("3", "Pham, Quoc Bao")]);
}

#[tokio::test]
async fn test_missing_artifact_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = LookupClassifier::new(&[]);
    let chunked = ChunkedClassifier::new(Arc::new(classifier), 10, 1);
    let handle = handle_for(&dir.path().join("absent.tsv"), 0);
    assert!(chunked.classify(&handle, &RecognizedLabels::new(LABELS), date(2024, 1, 2)).await.is_err());
}
