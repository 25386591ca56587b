//! Scan Orchestrator.
//!
//! Drives one `ScanRun` through `pending -> running -> completed | failed`:
//! - one task per collector in a `JoinSet`, all under the scan's wall-clock budget
//! - classification happens inside each family's task, right after collection
//! - the merge after every task has reported is the only synchronization point
//! - the terminal run and its findings are saved as one unit
//!
//! At most one scan per target is in flight; see `registry`.

mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::collect::{default_collectors, CollectContext, Collector};
use crate::config::{Config, FailurePolicy, ScanSettings};
use crate::engine::DecisionEngine;
use crate::error::{CollectorError, ScanError, StoreError};
use crate::model::{
    FamilyOutcome, FamilyStatus, Finding, ResourceFamily, ScanId, ScanRun, ScanStatus, ScanSummary, ScanTarget,
};
use crate::pricing::PricingTable;
use crate::source::retry::{RetryPolicy, RetryRunner};
use crate::source::Sources;
use crate::store::ScanStore;
use registry::ScanRegistry;

/// Pollable view of a scan. `summary` is only present once the run
/// has completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatusView {
    pub id: ScanId,
    pub target: ScanTarget,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScanSummary>,
    pub manifest: Vec<FamilyOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ScanRun> for ScanStatusView {
    fn from(run: &ScanRun) -> Self {
        ScanStatusView {
            id: run.id(),
            target: run.target().clone(),
            status: run.status(),
            summary: (run.status() == ScanStatus::Completed).then(|| *run.summary()),
            manifest: run.manifest().to_vec(),
            error: run.error().map(str::to_string),
        }
    }
}

struct Inner {
    settings: ScanSettings,
    retry: RetryPolicy,
    engine: DecisionEngine,
    sources: Sources,
    store: Arc<dyn ScanStore>,
    collectors: Vec<Arc<dyn Collector>>,
    registry: ScanRegistry,
}

/// What one family's task hands back to the merge step.
struct FamilyReport {
    outcome: FamilyOutcome,
    findings: Vec<Finding>,
}

/// Highest resident set size seen while a scan runs.
#[derive(Default)]
struct PeakMemory(Option<u64>);

impl PeakMemory {
    fn sample(&mut self) {
        if let Some(usage) = memory_stats::memory_stats() {
            let current = usage.physical_mem as u64;
            self.0 = Some(self.0.map_or(current, |peak| peak.max(current)));
        }
    }
}

/// Cheap to clone; clones share the registry and the store.
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<Inner>,
}

impl Scanner {
    pub fn new(config: &Config, pricing: PricingTable, sources: Sources, store: Arc<dyn ScanStore>) -> Self {
        Self::with_collectors(config, pricing, sources, store, default_collectors())
    }

    pub fn with_collectors(
        config: &Config,
        pricing: PricingTable,
        sources: Sources,
        store: Arc<dyn ScanStore>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        let engine = DecisionEngine::new(Arc::new(pricing), Arc::new(config.thresholds.clone()));
        Scanner {
            inner: Arc::new(Inner {
                settings: config.scan.clone(),
                retry: config.retry.clone(),
                engine,
                sources,
                store,
                collectors,
                registry: ScanRegistry::default(),
            }),
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.inner.engine
    }

    pub fn store(&self) -> Arc<dyn ScanStore> {
        self.inner.store.clone()
    }

    /// Registers a pending run and executes it in the background. Must be
    /// called from within a Tokio runtime.
    pub fn start_scan(&self, target: ScanTarget) -> Result<ScanId, ScanError> {
        let run = self.inner.registry.begin(&target)?;
        let id = run.id();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.execute(run).await;
        });
        Ok(id)
    }

    /// Runs a scan to its terminal state and returns the run as recorded.
    pub async fn run_scan(&self, target: ScanTarget) -> Result<ScanRun, ScanError> {
        let run = self.inner.registry.begin(&target)?;
        Ok(self.inner.clone().execute(run).await)
    }

    pub fn in_flight(&self, target: &ScanTarget) -> Option<ScanId> {
        self.inner.registry.in_flight(target)
    }

    pub async fn get_scan(&self, id: ScanId) -> Result<ScanRun, ScanError> {
        if let Some(run) = self.inner.registry.get(id) {
            return Ok(run);
        }
        self.inner
            .blocking(move |store| store.get_scan(id))
            .await?
            .ok_or(ScanError::NotFound(id))
    }

    pub async fn scan_status(&self, id: ScanId) -> Result<ScanStatusView, ScanError> {
        let run = self.get_scan(id).await?;
        Ok(ScanStatusView::from(&run))
    }

    /// Findings of a durably stored scan, highest severity first. A scan
    /// that is still running, or whose results could not be stored, has
    /// none.
    pub async fn findings(&self, id: ScanId) -> Result<Vec<Finding>, ScanError> {
        if self.inner.registry.get(id).is_some() {
            return Ok(Vec::new());
        }
        self.inner
            .blocking(move |store| match store.get_scan(id)? {
                Some(_) => store.get_findings(id).map(Some),
                None => Ok(None),
            })
            .await?
            .ok_or(ScanError::NotFound(id))
    }

    /// Stored scans, newest first.
    pub async fn list_scans(&self, region: Option<String>) -> Result<Vec<ScanRun>, ScanError> {
        self.inner
            .blocking(move |store| store.list_scans(region.as_deref()))
            .await
    }
}

impl Inner {
    async fn blocking<T, F>(&self, f: F) -> Result<T, ScanError>
    where
        F: FnOnce(&dyn ScanStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let value = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))??;
        Ok(value)
    }

    /// Always releases the target. A run that could not be stored stays
    /// answerable from the registry.
    async fn execute(self: Arc<Self>, mut run: ScanRun) -> ScanRun {
        let started = Utc::now();
        if let Err(e) = run.start(started) {
            warn!(scan_id = %run.id(), error = %e, "scan could not start");
            self.registry.finish(&run, false);
            return run;
        }
        self.registry.update(&run);
        info!(scan_id = %run.id(), target = %run.target(), "scan started");

        let ctx = Arc::new(CollectContext {
            target: run.target().clone(),
            sources: self.sources.clone(),
            settings: self.settings.clone(),
            retry: RetryRunner::new(self.retry.clone()),
            observed_at: started,
        });

        let mut memory = PeakMemory::default();
        memory.sample();
        let (manifest, findings, aborted) = self.gather(&ctx, run.id(), &mut memory).await;
        memory.sample();

        let running = run.clone();
        let findings = match conclude(&mut run, manifest.clone(), findings, aborted) {
            Ok(findings) => findings,
            Err(e) => {
                warn!(scan_id = %run.id(), error = %e, "scan could not conclude");
                self.registry.finish(&run, false);
                return run;
            }
        };
        run.record_runtime(memory.0, self.engine.pricing().version());

        let persisted = match self.persist(&run, findings).await {
            Ok(()) => true,
            Err(e) if run.status() == ScanStatus::Completed => {
                warn!(scan_id = %run.id(), error = %e, "could not store findings, recording the scan as failed");
                let reason = format!("storing results failed: {e}");
                run = running;
                if let Err(e) = run.fail(reason, manifest, Utc::now()) {
                    warn!(scan_id = %run.id(), error = %e, "scan could not be marked failed");
                }
                run.record_runtime(memory.0, self.engine.pricing().version());
                match self.persist(&run, Vec::new()).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(scan_id = %run.id(), error = %e, "could not store failed scan");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(scan_id = %run.id(), error = %e, "could not store failed scan");
                false
            }
        };
        self.registry.finish(&run, persisted);

        match run.status() {
            ScanStatus::Completed => info!(
                scan_id = %run.id(),
                target = %run.target(),
                findings = run.summary().total_findings,
                monthly_savings = %run.summary().monthly_savings,
                failed_families = run.failed_families().len(),
                duration_ms = run.duration_ms().unwrap_or_default(),
                "scan completed"
            ),
            _ => warn!(
                scan_id = %run.id(),
                target = %run.target(),
                error = run.error().unwrap_or_default(),
                "scan failed"
            ),
        }
        run
    }

    /// Runs every collector concurrently and merges their reports into a
    /// manifest ordered by family. The third value is the failure that
    /// tripped a fail-fast abort, if any.
    async fn gather(
        &self,
        ctx: &Arc<CollectContext>,
        scan_id: ScanId,
        memory: &mut PeakMemory,
    ) -> (Vec<FamilyOutcome>, Vec<Finding>, Option<String>) {
        let deadline = Instant::now() + ctx.settings.budget;
        let mut tasks = JoinSet::new();

        for collector in &self.collectors {
            let collector = collector.clone();
            let ctx = ctx.clone();
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let family = collector.family();
                let collected = match timeout_at(deadline, collector.collect(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(CollectorError::Timeout { family }),
                };
                match collected {
                    Ok(snapshots) => {
                        let classified = engine.classify_all(scan_id, &ctx.target.region, &snapshots);
                        debug!(
                            %scan_id,
                            collector = collector.name(),
                            resources = snapshots.len(),
                            findings = classified.findings.len(),
                            "family classified"
                        );
                        FamilyReport {
                            outcome: FamilyOutcome {
                                family,
                                status: FamilyStatus::Succeeded {
                                    resources: snapshots.len(),
                                    findings: classified.findings.len(),
                                    pricing_gaps: classified.pricing_gaps,
                                    skipped_rules: classified.skipped.len(),
                                },
                            },
                            findings: classified.findings,
                        }
                    }
                    Err(e) => FamilyReport {
                        outcome: FamilyOutcome::failed(family, e.to_string()),
                        findings: Vec::new(),
                    },
                }
            });
        }

        let mut outcomes: BTreeMap<ResourceFamily, FamilyOutcome> = BTreeMap::new();
        let mut findings = Vec::new();
        let mut aborted = None;

        while let Some(joined) = tasks.join_next().await {
            memory.sample();
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    if !e.is_cancelled() {
                        warn!(%scan_id, error = %e, "collector task panicked");
                    }
                    continue;
                }
            };
            if let FamilyStatus::Failed { error } = &report.outcome.status {
                warn!(%scan_id, family = %report.outcome.family, error = %error, "family failed");
                if self.settings.failure_policy == FailurePolicy::FailFast && aborted.is_none() {
                    aborted = Some(error.clone());
                    tasks.abort_all();
                }
            }
            findings.extend(report.findings);
            outcomes.insert(report.outcome.family, report.outcome);
        }

        for collector in &self.collectors {
            let family = collector.family();
            outcomes.entry(family).or_insert_with(|| {
                let reason = if aborted.is_some() {
                    "aborted after another family failed"
                } else {
                    "collector task did not report"
                };
                FamilyOutcome::failed(family, reason)
            });
        }

        (outcomes.into_values().collect(), findings, aborted)
    }

    async fn persist(&self, run: &ScanRun, findings: Vec<Finding>) -> Result<(), ScanError> {
        let run = run.clone();
        self.blocking(move |store| store.save_scan(&run, &findings)).await
    }
}

/// Moves a running scan to its terminal state. Completes when at least
/// one family succeeded and no fail-fast abort happened; otherwise fails,
/// and a failed run keeps no findings.
fn conclude(
    run: &mut ScanRun,
    manifest: Vec<FamilyOutcome>,
    mut findings: Vec<Finding>,
    aborted: Option<String>,
) -> Result<Vec<Finding>, ScanError> {
    let now = Utc::now();
    let any_succeeded = manifest.iter().any(FamilyOutcome::is_success);

    match aborted {
        None if any_succeeded => {
            sort_findings(&mut findings);
            run.complete(&findings, manifest, now)?;
            Ok(findings)
        }
        None => {
            let reason = if manifest.is_empty() {
                "no resource families requested".to_string()
            } else {
                "every resource family failed".to_string()
            };
            run.fail(reason, manifest, now)?;
            Ok(Vec::new())
        }
        Some(error) => {
            run.fail(format!("aborted: {error}"), manifest, now)?;
            Ok(Vec::new())
        }
    }
}

/// Highest severity first, then largest savings, then resource and kind
/// so equal findings always come out in the same order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity()
            .cmp(&a.severity())
            .then_with(|| b.monthly_savings().cmp(&a.monthly_savings()))
            .then_with(|| a.resource_id().cmp(b.resource_id()))
            .then_with(|| a.kind().as_str().cmp(b.kind().as_str()))
    });
}
