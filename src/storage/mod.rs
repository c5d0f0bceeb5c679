use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::*;

pub mod memory;
pub mod postgres;

pub use memory::*;
pub use postgres::*;

/// The three tables the pipeline writes to. Their physical names come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableRole {
    /// `(id, name)` rows selected by the run window.
    Staging,
    /// Target-shaped table holding this run's classifications before the merge.
    Temp,
    /// Permanent reporting table; one live row per customer id.
    Target,
}

impl TableRole {
    pub fn schema(&self) -> &'static str {
        match self {
            TableRole::Staging => "(id varchar(20), name varchar(50))",
            TableRole::Temp | TableRole::Target => {
                "(customer_id varchar(20), ethnicity varchar(50), assigned_on varchar(10))"
            }
        }
    }
}

/// How a table is brought into shape before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TablePolicy {
    /// Create the table when missing; existing data is never touched.
    CreateIfAbsent,
    /// Drop (advisory) then create, yielding an empty table.
    RecreateAlways,
    /// Do nothing.
    LeaveAsIs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOutcome {
    Created,
    Existing,
    Recreated,
    Untouched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceCounts {
    pub deleted: u64,
    pub inserted: u64,
}

/// Upstream source plus the staging/temporary/reporting tables, seen as one relational store.
///
/// Every method is one independently retriable bulk step; none of them spans another.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Number of upstream customers inside `window` (and the configured customer list).
    async fn count_candidates(&self, window: &RunWindow) -> Result<u64>;

    /// Drop `role`'s table if it exists.
    async fn drop_table(&self, role: TableRole) -> Result<()>;

    /// Create `role`'s table. With `if_absent` an existing table is kept;
    /// returns whether a table was created.
    async fn create_table(&self, role: TableRole, if_absent: bool) -> Result<bool>;

    /// Copy qualifying upstream rows into staging; returns rows written.
    async fn populate_staging(&self, window: &RunWindow) -> Result<u64>;

    /// Write staging to a tab-delimited artifact at `path`; returns rows written.
    async fn export_staging(&self, path: &Path) -> Result<u64>;

    async fn bulk_write_temp(&self, entries: &[TargetTableEntry]) -> Result<u64>;

    async fn count_rows(&self, role: TableRole) -> Result<u64>;

    /// Delete target rows whose id is in temp, then insert all temp rows.
    /// With `atomic` both statements share one transaction.
    async fn replace_from_temp(&self, atomic: bool) -> Result<ReplaceCounts>;
}

/// Bring `role`'s table into the state `policy` asks for.
///
/// A failed drop only warns: if the table really is gone or was never there the
/// following create succeeds, otherwise the create reports the error.
pub async fn ensure_table(
    store: &dyn WarehouseStore,
    role: TableRole,
    policy: TablePolicy,
) -> Result<TableOutcome> {
    match policy {
        TablePolicy::LeaveAsIs => Ok(TableOutcome::Untouched),
        TablePolicy::CreateIfAbsent => {
            let created = store.create_table(role, true).await?;
            Ok(if created { TableOutcome::Created } else { TableOutcome::Existing })
        }
        TablePolicy::RecreateAlways => {
            if let Err(e) = store.drop_table(role).await {
                tracing::warn!(table = ?role, error = %e, "Drop before recreate failed; attempting create anyway");
            }
            store.create_table(role, false).await?;
            tracing::info!(table = ?role, "Re-created table");
            Ok(TableOutcome::Recreated)
        }
    }
}
