use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::ScanError;
use crate::model::{ScanId, ScanRun, ScanTarget};

/// Terminal runs kept after their save failed, oldest dropped first.
const MAX_UNSTORED: usize = 64;

#[derive(Default)]
struct Inner {
    /// Runs not (yet) durably stored: pending, running, or terminal runs
    /// whose save failed.
    runs: HashMap<ScanId, ScanRun>,
    /// At most one scan per target.
    in_flight: HashMap<ScanTarget, ScanId>,
    /// Terminal unstored runs, oldest first.
    unstored: VecDeque<ScanId>,
}

/// Live scan state shared between the orchestrator and status readers.
pub(crate) struct ScanRegistry {
    inner: Mutex<Inner>,
    max_unstored: usize,
}

impl Default for ScanRegistry {
    fn default() -> Self {
        ScanRegistry::with_capacity(MAX_UNSTORED)
    }
}

impl ScanRegistry {
    pub(crate) fn with_capacity(max_unstored: usize) -> Self {
        ScanRegistry {
            inner: Mutex::new(Inner::default()),
            max_unstored,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a pending run for `target`, or reports the scan already in
    /// flight for it.
    pub(crate) fn begin(&self, target: &ScanTarget) -> Result<ScanRun, ScanError> {
        let mut inner = self.lock();
        if let Some(scan_id) = inner.in_flight.get(target) {
            return Err(ScanError::AlreadyRunning { scan_id: *scan_id });
        }
        let run = ScanRun::new(target.clone());
        inner.in_flight.insert(target.clone(), run.id());
        inner.runs.insert(run.id(), run.clone());
        Ok(run)
    }

    pub(crate) fn update(&self, run: &ScanRun) {
        self.lock().runs.insert(run.id(), run.clone());
    }

    /// Releases the target. A durably stored run is served from the store
    /// from now on; otherwise the registry keeps answering for it until
    /// `max_unstored` newer unstored runs push it out.
    pub(crate) fn finish(&self, run: &ScanRun, persisted: bool) {
        let mut inner = self.lock();
        if inner.in_flight.get(run.target()) == Some(&run.id()) {
            inner.in_flight.remove(run.target());
        }
        if persisted {
            inner.runs.remove(&run.id());
            return;
        }
        inner.runs.insert(run.id(), run.clone());
        inner.unstored.push_back(run.id());
        while inner.unstored.len() > self.max_unstored {
            if let Some(oldest) = inner.unstored.pop_front() {
                debug!(scan_id = %oldest, "dropping unstored scan");
                inner.runs.remove(&oldest);
            }
        }
    }

    pub(crate) fn get(&self, id: ScanId) -> Option<ScanRun> {
        self.lock().runs.get(&id).cloned()
    }

    pub(crate) fn in_flight(&self, target: &ScanTarget) -> Option<ScanId> {
        self.lock().in_flight.get(target).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn one_scan_per_target() {
        let registry = ScanRegistry::default();
        let london = ScanTarget::new("eu-west-2");
        let first = registry.begin(&london).unwrap();

        match registry.begin(&london) {
            Err(ScanError::AlreadyRunning { scan_id }) => assert_eq!(scan_id, first.id()),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        // other account, same region: a different key
        assert!(registry.begin(&london.clone().with_account("210987654321")).is_ok());
        assert!(registry.begin(&ScanTarget::new("us-east-1")).is_ok());
    }

    #[test]
    fn finishing_releases_the_target() {
        let registry = ScanRegistry::default();
        let target = ScanTarget::new("eu-west-2");
        let mut run = registry.begin(&target).unwrap();
        run.start(Utc::now()).unwrap();
        run.complete(&[], vec![], Utc::now()).unwrap();

        registry.finish(&run, true);
        assert!(registry.get(run.id()).is_none());
        assert!(registry.in_flight(&target).is_none());
        assert!(registry.begin(&target).is_ok());
    }

    #[test]
    fn unsaved_runs_stay_queryable() {
        let registry = ScanRegistry::default();
        let mut run = registry.begin(&ScanTarget::new("eu-west-2")).unwrap();
        run.start(Utc::now()).unwrap();
        run.fail("store down", vec![], Utc::now()).unwrap();

        registry.finish(&run, false);
        assert_eq!(registry.get(run.id()), Some(run));
    }

    #[test]
    fn unsaved_runs_are_bounded() {
        let registry = ScanRegistry::with_capacity(2);
        let target = ScanTarget::new("eu-west-2");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut run = registry.begin(&target).unwrap();
            run.start(Utc::now()).unwrap();
            run.fail("store down", vec![], Utc::now()).unwrap();
            registry.finish(&run, false);
            ids.push(run.id());
        }

        assert!(registry.get(ids[0]).is_none());
        assert!(registry.get(ids[1]).is_some());
        assert!(registry.get(ids[2]).is_some());
    }
}
