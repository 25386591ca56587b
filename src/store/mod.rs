//! Scan Store Adapter.
//!
//! The orchestrator persists a terminal scan run and all of its findings
//! through `save_scan` as one unit and reads history back through the
//! query methods. Two implementations:
//! - `SqliteStore`: local SQLite database, `scan_runs` + `findings` tables
//! - `MemoryStore`: process-local, for tests and throwaway runs

pub mod diff;
pub mod memory;
pub mod sqlite;

use crate::error::StoreError;
use crate::model::{Finding, ScanId, ScanRun};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Implementations are called from blocking threads and must be shareable.
pub trait ScanStore: Send + Sync {
    /// Persists the run and its findings atomically. Runs that are not yet
    /// terminal are rejected, as are failed runs carrying findings.
    fn save_scan(&self, run: &ScanRun, findings: &[Finding]) -> Result<(), StoreError>;

    fn get_scan(&self, id: ScanId) -> Result<Option<ScanRun>, StoreError>;

    /// Newest first, optionally restricted to one region.
    fn list_scans(&self, region: Option<&str>) -> Result<Vec<ScanRun>, StoreError>;

    fn get_findings(&self, id: ScanId) -> Result<Vec<Finding>, StoreError>;

    /// Removes a run together with its findings. Returns whether it existed.
    fn delete_scan(&self, id: ScanId) -> Result<bool, StoreError>;

    fn latest_scan(&self, region: Option<&str>) -> Result<Option<ScanRun>, StoreError> {
        Ok(self.list_scans(region)?.into_iter().next())
    }
}

/// Shared precondition for every implementation.
pub(crate) fn check_writable(run: &ScanRun, findings: &[Finding]) -> Result<(), StoreError> {
    if !run.status().is_terminal() {
        return Err(StoreError::NotTerminal(run.id()));
    }
    if run.status() == crate::model::ScanStatus::Failed && !findings.is_empty() {
        return Err(StoreError::Rejected(format!(
            "failed scan {} cannot carry findings",
            run.id()
        )));
    }
    if let Some(stray) = findings.iter().find(|f| f.scan_id() != run.id()) {
        return Err(StoreError::Rejected(format!(
            "finding for {} belongs to scan {}",
            stray.resource_id(),
            stray.scan_id()
        )));
    }
    Ok(())
}
