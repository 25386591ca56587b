use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{check_writable, ScanStore};
use crate::error::StoreError;
use crate::model::{Finding, ScanId, ScanRun};

/// Which writes an in-memory store refuses, to exercise persistence failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteFailure {
    #[default]
    None,
    /// Saves that carry at least one finding fail.
    WithFindings,
    /// Every save fails.
    All,
}

#[derive(Default)]
struct Inner {
    /// Insertion order, oldest first.
    runs: Vec<ScanRun>,
    findings: HashMap<ScanId, Vec<Finding>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failure: WriteFailure,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failure: WriteFailure) -> Self {
        MemoryStore {
            inner: Mutex::default(),
            failure,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScanStore for MemoryStore {
    fn save_scan(&self, run: &ScanRun, findings: &[Finding]) -> Result<(), StoreError> {
        check_writable(run, findings)?;
        match self.failure {
            WriteFailure::All => return Err(StoreError::Rejected("store is read-only".into())),
            WriteFailure::WithFindings if !findings.is_empty() => {
                return Err(StoreError::Rejected("findings table unavailable".into()))
            }
            _ => {}
        }

        let mut inner = self.inner();
        if inner.runs.iter().any(|r| r.id() == run.id()) {
            return Err(StoreError::Rejected(format!("scan {} already saved", run.id())));
        }
        inner.runs.push(run.clone());
        inner.findings.insert(run.id(), findings.to_vec());
        Ok(())
    }

    fn get_scan(&self, id: ScanId) -> Result<Option<ScanRun>, StoreError> {
        Ok(self.inner().runs.iter().find(|r| r.id() == id).cloned())
    }

    fn list_scans(&self, region: Option<&str>) -> Result<Vec<ScanRun>, StoreError> {
        let inner = self.inner();
        let mut runs: Vec<ScanRun> = inner
            .runs
            .iter()
            .rev()
            .filter(|r| region.map_or(true, |region| r.region() == region))
            .cloned()
            .collect();
        // stable: equal timestamps keep newest-inserted first
        runs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(runs)
    }

    fn get_findings(&self, id: ScanId) -> Result<Vec<Finding>, StoreError> {
        Ok(self.inner().findings.get(&id).cloned().unwrap_or_default())
    }

    fn delete_scan(&self, id: ScanId) -> Result<bool, StoreError> {
        let mut inner = self.inner();
        let before = inner.runs.len();
        inner.runs.retain(|r| r.id() != id);
        inner.findings.remove(&id);
        Ok(inner.runs.len() != before)
    }
}
