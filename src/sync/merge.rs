use std::sync::Arc;

use tokio::time::Instant;

use crate::models::*;
use crate::storage::{ensure_table, TablePolicy, TableRole, WarehouseStore};

/// Applies a run's results to the reporting table through the temp table.
#[derive(Clone)]
pub struct MergeWriter {
    store: Arc<dyn WarehouseStore>,
    atomic: bool,
}

impl MergeWriter {
    pub fn new(store: Arc<dyn WarehouseStore>, atomic: bool) -> Self {
        Self { store, atomic }
    }

    /// Replace the target rows of every customer in `results`; rows of other customers stay as they are.
    pub async fn merge(&self, results: &ResultSet) -> Result<MergeReport> {
        if results.is_empty() {
            tracing::warn!("Nothing to upload; reporting table left untouched");
            return Ok(MergeReport::nothing_to_upload());
        }
        let start = Instant::now();
        let entries = results.to_entries();
        if entries.len() < results.len() {
            tracing::warn!(
                records = results.len(),
                unique_ids = entries.len(),
                "Duplicate customer ids in results; keeping the last classification"
            );
        }
        let expected_rows = entries.len() as u64;

        ensure_table(self.store.as_ref(), TableRole::Temp, TablePolicy::RecreateAlways).await?;
        self.store.bulk_write_temp(&entries).await?;

        let temp_rows = self.store.count_rows(TableRole::Temp).await?;
        let count_mismatch = temp_rows != expected_rows;
        if count_mismatch {
            tracing::warn!(expected = expected_rows, actual = temp_rows, "Temp table row count mismatch");
        } else {
            tracing::info!(rows = temp_rows, "Temp table loaded");
        }

        ensure_table(self.store.as_ref(), TableRole::Target, TablePolicy::CreateIfAbsent).await?;
        let counts = self.store.replace_from_temp(self.atomic).await?;

        tracing::info!(
            deleted = counts.deleted,
            inserted = counts.inserted,
            atomic = self.atomic,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reporting table updated"
        );
        Ok(MergeReport {
            uploaded: true,
            expected_rows,
            temp_rows,
            count_mismatch,
            deleted: counts.deleted,
            inserted: counts.inserted,
        })
    }
}
