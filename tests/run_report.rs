mod common;

use common::*;
use ethnicity_sync::{ClassifiedRecord, ResultSet, RunReporter, RunWindow, WindowMode};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn results(groups: &[(&str, usize)]) -> ResultSet {
    let mut records = Vec::new();
    let mut next_id = 100;
    for (label, n) in groups {
        for _ in 0..*n {
            records.push(ClassifiedRecord {
                customer_id: next_id.to_string(),
                full_name: format!("Name {}", next_id),
                ethnicity: label.to_string(),
                assigned_on: date(2024, 3, 5),
            });
            next_id += 1;
        }
    }
    ResultSet::new(records)
}

fn window() -> RunWindow {
    RunWindow::for_mode(WindowMode::LastDays(7), date(2024, 3, 10)).unwrap()
}

#[test]
fn test_counts_sorted_by_frequency_then_label() {
    let set = results(&[("thai", 1), ("vietnamese", 4), ("chinese", 2), ("korean", 2)]);
    let payload = RunReporter::new().report(&set, &window()).unwrap();
    let order: Vec<(&str, u64)> = payload.counts.iter().map(|c| (c.label.as_str(), c.count)).collect();
    assert_eq!(order, vec![("vietnamese", 4), ("chinese", 2), ("korean", 2), ("thai", 1)]);
    assert_eq!(
        payload.subject,
        "ethnicities: customers created or modified within last 7 days, between 20240304 and 20240310"
    );
}

#[test]
fn test_sample_size_per_label() {
    let set = results(&[("vietnamese", 5), ("chinese", 2), ("thai", 3)]);
    let mut rng = StdRng::seed_from_u64(7);
    let payload = RunReporter::new().report_with_rng(&set, &window(), &mut rng).unwrap();

    let per_label = |label: &str| payload.sample.iter().filter(|r| r.ethnicity == label).count();
    assert_eq!(per_label("vietnamese"), 3);
    assert_eq!(per_label("thai"), 3);
    assert_eq!(per_label("chinese"), 1);

    // Drawn without replacement
    let mut ids: Vec<&str> = payload.sample.iter().map(|r| r.customer_id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), payload.sample.len());
}

#[test]
fn test_body_layout() {
    let set = results(&[("korean", 1)]);
    let payload = RunReporter::new().report(&set, &window()).unwrap();
    let expected = format!(
        "-- new ethnic customer ids captured:\n\nKOREAN: 1\n\n-- sample:\n\n{:<12} {:<30} {:<20}\n{:<12} {:<30} {:<20}\n",
        "CustomerID", "FullName", "Ethnicity", "100", "Name 100", "korean"
    );
    assert_eq!(payload.body, expected);
}

#[test]
fn test_repeated_customer_counted_once() {
    let mut records = results(&[("thai", 2)]).into_records();
    let mut repeat = records[0].clone();
    repeat.ethnicity = "korean".to_string();
    records.push(repeat);
    let payload = RunReporter::new().report(&ResultSet::new(records), &window()).unwrap();

    let order: Vec<(&str, u64)> = payload.counts.iter().map(|c| (c.label.as_str(), c.count)).collect();
    assert_eq!(order, vec![("korean", 1), ("thai", 1)]);
    assert_eq!(payload.sample.len(), 2);
    assert!(payload.summary.contains("KOREAN: 1\nTHAI: 1\n"));
}
