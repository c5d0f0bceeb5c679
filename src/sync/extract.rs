use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;

use crate::models::*;
use crate::storage::{ensure_table, TablePolicy, TableRole, WarehouseStore};

/// Where this run's candidates ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingHandle {
    pub artifact_path: PathBuf,
    pub counted: u64,
    pub exported: u64,
}

/// Materialises the run window's candidates: upstream → staging table → artifact on disk.
#[derive(Clone)]
pub struct StagingExtractor {
    store: Arc<dyn WarehouseStore>,
    artifact_path: PathBuf,
}

impl StagingExtractor {
    pub fn new(store: Arc<dyn WarehouseStore>, artifact_path: PathBuf) -> Self {
        Self { store, artifact_path }
    }

    pub async fn extract(&self, window: &RunWindow) -> Result<StagingHandle> {
        let start = Instant::now();

        let counted = self.store.count_candidates(window).await?;
        tracing::info!(window = %window.describe(), candidates = counted, "Counted customers in run window");

        ensure_table(self.store.as_ref(), TableRole::Staging, TablePolicy::RecreateAlways).await?;

        let populated = self.store.populate_staging(window).await?;
        if populated != counted {
            // Upstream kept moving between the two statements
            tracing::warn!(counted, populated, "Staging row count differs from the initial count");
        }

        let exported = self.store.export_staging(&self.artifact_path).await?;
        tracing::info!(
            path = %self.artifact_path.display(),
            populated,
            exported,
            duration_ms = start.elapsed().as_millis() as u64,
            "Staging artifact written"
        );

        Ok(StagingHandle { artifact_path: self.artifact_path.clone(), counted, exported })
    }
}
