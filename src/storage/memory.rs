use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::handlers::write_staging_artifact;
use crate::models::*;
use crate::storage::{ReplaceCounts, TableRole, WarehouseStore};

/// An upstream customer row, with the same columns the PostgreSQL adapter reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCustomer {
    pub customer_id: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub created_date: NaiveDateTime,
    pub modified_date: Option<NaiveDateTime>,
    pub customer_list_id: i32,
}

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    CountCandidates,
    DropTable(TableRole),
    CreateTable(TableRole),
    PopulateStaging,
    ExportStaging,
    BulkWriteTemp,
    CountRows(TableRole),
    ReplaceFromTemp,
}

#[derive(Debug, Default)]
struct MemoryState {
    source: Vec<SourceCustomer>,
    staging: Option<Vec<CandidateRecord>>,
    temp: Option<Vec<TargetTableEntry>>,
    target: Option<Vec<TargetTableEntry>>,
    failing: HashSet<MemoryOp>,
    write_calls: u64,
    calls: Vec<MemoryOp>,
}

impl MemoryState {
    fn table(&self, role: TableRole) -> bool {
        match role {
            TableRole::Staging => self.staging.is_some(),
            TableRole::Temp => self.temp.is_some(),
            TableRole::Target => self.target.is_some(),
        }
    }
}

/// In-process [`WarehouseStore`] used by tests and local dry runs.
///
/// Tables are plain vectors behind a mutex; every call is recorded so callers can
/// assert which operations a run performed.
#[derive(Clone, Default)]
pub struct MemoryStore {
    segment: i32,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(segment: i32) -> Self {
        Self { segment, state: Arc::new(Mutex::new(MemoryState::default())) }
    }

    pub fn insert_source(&self, customer: SourceCustomer) {
        self.lock().source.push(customer);
    }

    /// Create the target table (if needed) and append `entries` to it as-is.
    pub fn seed_target(&self, entries: Vec<TargetTableEntry>) {
        self.lock().target.get_or_insert_with(Vec::new).extend(entries);
    }

    pub fn target_rows(&self) -> Option<Vec<TargetTableEntry>> {
        self.lock().target.clone()
    }

    pub fn temp_rows(&self) -> Option<Vec<TargetTableEntry>> {
        self.lock().temp.clone()
    }

    pub fn staging_rows(&self) -> Option<Vec<CandidateRecord>> {
        self.lock().staging.clone()
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: MemoryOp) {
        self.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Number of calls that mutated a table.
    pub fn write_calls(&self) -> u64 {
        self.lock().write_calls
    }

    pub fn calls(&self) -> Vec<MemoryOp> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self, op: MemoryOp) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        let mut state = self.lock();
        state.calls.push(op);
        if state.failing.contains(&op) {
            return Err(PipelineError::Staging(format!("injected failure for {:?}", op)));
        }
        Ok(state)
    }

    fn qualifying(&self, state: &MemoryState, window: &RunWindow) -> Vec<CandidateRecord> {
        state
            .source
            .iter()
            .filter(|c| c.customer_list_id == self.segment)
            .filter(|c| window.qualifies(c.created_date, c.modified_date))
            .map(|c| CandidateRecord {
                customer_id: c.customer_id.clone(),
                full_name: compose_full_name(
                    c.first_name.as_deref(),
                    c.middle_name.as_deref(),
                    c.last_name.as_deref(),
                ),
            })
            .collect()
    }
}

fn missing(role: TableRole) -> PipelineError {
    PipelineError::Staging(format!("table {:?} does not exist", role))
}

#[async_trait]
impl WarehouseStore for MemoryStore {
    async fn count_candidates(&self, window: &RunWindow) -> Result<u64> {
        let state = self.enter(MemoryOp::CountCandidates)?;
        Ok(self.qualifying(&state, window).len() as u64)
    }

    async fn drop_table(&self, role: TableRole) -> Result<()> {
        let mut state = self.enter(MemoryOp::DropTable(role))?;
        state.write_calls += 1;
        match role {
            TableRole::Staging => state.staging = None,
            TableRole::Temp => state.temp = None,
            TableRole::Target => state.target = None,
        }
        Ok(())
    }

    async fn create_table(&self, role: TableRole, if_absent: bool) -> Result<bool> {
        let mut state = self.enter(MemoryOp::CreateTable(role))?;
        if state.table(role) {
            if if_absent {
                return Ok(false);
            }
            return Err(PipelineError::Staging(format!("table {:?} already exists", role)));
        }
        state.write_calls += 1;
        match role {
            TableRole::Staging => state.staging = Some(Vec::new()),
            TableRole::Temp => state.temp = Some(Vec::new()),
            TableRole::Target => state.target = Some(Vec::new()),
        }
        Ok(true)
    }

    async fn populate_staging(&self, window: &RunWindow) -> Result<u64> {
        let mut state = self.enter(MemoryOp::PopulateStaging)?;
        let rows = self.qualifying(&state, window);
        let written = rows.len() as u64;
        state.write_calls += 1;
        state.staging.as_mut().ok_or_else(|| missing(TableRole::Staging))?.extend(rows);
        Ok(written)
    }

    async fn export_staging(&self, path: &Path) -> Result<u64> {
        let rows = {
            let state = self.enter(MemoryOp::ExportStaging)?;
            state.staging.clone().ok_or_else(|| missing(TableRole::Staging))?
        };
        let mut buf = Vec::new();
        let written = write_staging_artifact(&mut buf, &rows)?;
        tokio::fs::write(path, buf).await?;
        Ok(written)
    }

    async fn bulk_write_temp(&self, entries: &[TargetTableEntry]) -> Result<u64> {
        let mut state = self.enter(MemoryOp::BulkWriteTemp)?;
        state.write_calls += 1;
        state.temp.as_mut().ok_or_else(|| missing(TableRole::Temp))?.extend_from_slice(entries);
        Ok(entries.len() as u64)
    }

    async fn count_rows(&self, role: TableRole) -> Result<u64> {
        let state = self.enter(MemoryOp::CountRows(role))?;
        let len = match role {
            TableRole::Staging => state.staging.as_ref().map(|t| t.len()),
            TableRole::Temp => state.temp.as_ref().map(|t| t.len()),
            TableRole::Target => state.target.as_ref().map(|t| t.len()),
        };
        len.map(|n| n as u64).ok_or_else(|| missing(role))
    }

    async fn replace_from_temp(&self, _atomic: bool) -> Result<ReplaceCounts> {
        // Single lock for both steps, so this store always behaves atomically
        let mut state = self.enter(MemoryOp::ReplaceFromTemp)?;
        let temp = state.temp.clone().ok_or_else(|| missing(TableRole::Temp))?;
        let ids: HashSet<&str> = temp.iter().map(|e| e.customer_id.as_str()).collect();
        state.write_calls += 1;
        let target = state.target.as_mut().ok_or_else(|| missing(TableRole::Target))?;
        let before = target.len();
        target.retain(|e| !ids.contains(e.customer_id.as_str()));
        let deleted = (before - target.len()) as u64;
        target.extend(temp.iter().cloned());
        Ok(ReplaceCounts { deleted, inserted: temp.len() as u64 })
    }
}
