//! In-process inventory and metrics source backed by a JSON document.
//!
//! Used by the CLI (`--inventory`, `--demo`) and by the test suites. Records
//! are served in pages of `page_size` so callers have to follow
//! continuation tokens. Failures can be injected per inventory kind and
//! per metric.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    DatabaseRecord, InstanceRecord, InstanceState, InventoryKind, InventoryPage, InventoryRequest,
    InventorySource, Metric, MetricQuery, MetricsSource, ResourceRecord, SnapshotRecord, VolumeRecord,
    VolumeState,
};
use crate::error::SourceError;
use crate::series::Datapoint;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Shape of a synthetic metric, materialized at query time over the
/// requested window so fixture files do not go stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Pattern {
    Flat { value: f64 },
    /// `high` from 09:00 to 18:00 UTC, `low` otherwise.
    Workday { low: f64, high: f64 },
    Points { points: Vec<Datapoint> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFixture {
    pub resource_id: String,
    pub metric: Metric,
    #[serde(flatten)]
    pub pattern: Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum Failure {
    Unauthorized,
    NotFound,
    /// Throttled on every call.
    Throttled,
    /// Throttled for the first `times` calls, then served normally.
    ThrottledTimes { times: usize },
    /// Never answers within any reasonable budget.
    Stall { millis: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureDoc {
    /// When set, only requests for this region see any records.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricFixture>,
    #[serde(default)]
    pub fail: BTreeMap<InventoryKind, Failure>,
    /// Applies to every resource's series of that metric.
    #[serde(default)]
    pub fail_metrics: BTreeMap<Metric, Failure>,
}

impl FixtureDoc {
    pub fn push(&mut self, record: ResourceRecord) {
        self.resources.push(record);
    }

    pub fn metric(&mut self, resource_id: &str, metric: Metric, pattern: Pattern) {
        self.metrics.push(MetricFixture {
            resource_id: resource_id.to_string(),
            metric,
            pattern,
        });
    }
}

pub struct FixtureSource {
    doc: FixtureDoc,
    page_size: usize,
    inventory_calls: AtomicUsize,
    /// Throttled calls served so far, by inventory kind or metric name.
    throttled: Mutex<HashMap<String, usize>>,
}

impl FixtureSource {
    pub fn new(doc: FixtureDoc) -> Self {
        FixtureSource {
            doc,
            page_size: 50,
            inventory_calls: AtomicUsize::new(0),
            throttled: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
        let doc: FixtureDoc = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
        Ok(FixtureSource::new(doc))
    }

    /// Inventory calls served so far, including failed ones.
    pub fn inventory_calls(&self) -> usize {
        self.inventory_calls.load(Ordering::SeqCst)
    }

    async fn inject(&self, failure: Option<Failure>, call: String) -> Result<(), SourceError> {
        let Some(failure) = failure else {
            return Ok(());
        };
        match failure {
            Failure::Unauthorized => Err(SourceError::Unauthorized(format!("{call} denied"))),
            Failure::NotFound => Err(SourceError::NotFound(call)),
            Failure::Throttled => Err(SourceError::Throttled(call)),
            Failure::ThrottledTimes { times } => {
                let mut seen = self.throttled.lock().unwrap_or_else(|e| e.into_inner());
                let count = seen.entry(call.clone()).or_insert(0);
                if *count < times {
                    *count += 1;
                    return Err(SourceError::Throttled(call));
                }
                Ok(())
            }
            Failure::Stall { millis } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Err(SourceError::Timeout(call))
            }
        }
    }

    fn matches(kind: InventoryKind, record: &ResourceRecord) -> bool {
        matches!(
            (kind, record),
            (InventoryKind::Instances, ResourceRecord::Instance(_))
                | (InventoryKind::Volumes, ResourceRecord::Volume(_))
                | (InventoryKind::Snapshots, ResourceRecord::Snapshot(_))
                | (InventoryKind::Databases, ResourceRecord::Database(_))
        )
    }
}

fn parse_token(token: &str) -> Result<usize, SourceError> {
    token
        .strip_prefix("page-")
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| SourceError::Pagination(format!("unknown continuation token '{token}'")))
}

#[async_trait]
impl InventorySource for FixtureSource {
    async fn list_resources(
        &self,
        request: &InventoryRequest,
        page_token: Option<&str>,
    ) -> Result<InventoryPage, SourceError> {
        self.inventory_calls.fetch_add(1, Ordering::SeqCst);
        self.inject(
            self.doc.fail.get(&request.kind).copied(),
            format!("listing {}", request.kind.as_str()),
        )
        .await?;

        if let Some(region) = &self.doc.region {
            if *region != request.target.region {
                return Ok(InventoryPage::default());
            }
        }

        let offset = page_token.map(parse_token).transpose()?.unwrap_or(0);
        let mut matching = self
            .doc
            .resources
            .iter()
            .filter(|record| Self::matches(request.kind, record))
            .skip(offset);
        let records: Vec<ResourceRecord> = matching.by_ref().take(self.page_size).cloned().collect();
        let next_token = matching
            .next()
            .map(|_| format!("page-{}", offset + records.len()));

        debug!(kind = request.kind.as_str(), offset, served = records.len(), "fixture page");
        Ok(InventoryPage { records, next_token })
    }
}

#[async_trait]
impl MetricsSource for FixtureSource {
    async fn get_time_series(&self, query: &MetricQuery) -> Result<Vec<Datapoint>, SourceError> {
        self.inject(
            self.doc.fail_metrics.get(&query.metric).copied(),
            format!("reading {}", query.metric.name()),
        )
        .await?;

        let Some(fixture) = self
            .doc
            .metrics
            .iter()
            .find(|m| m.resource_id == query.resource_id && m.metric == query.metric)
        else {
            return Ok(Vec::new());
        };

        let start = query.start();
        let points = match &fixture.pattern {
            Pattern::Points { points } => points
                .iter()
                .filter(|p| p.timestamp >= start && p.timestamp < query.end)
                .copied()
                .collect(),
            Pattern::Flat { value } => slots(start, query).map(|t| Datapoint::new(t, *value)).collect(),
            Pattern::Workday { low, high } => slots(start, query)
                .map(|t| {
                    let value = if (9..18).contains(&t.hour()) { *high } else { *low };
                    Datapoint::new(t, value)
                })
                .collect(),
        };
        Ok(points)
    }
}

fn slots(start: DateTime<Utc>, query: &MetricQuery) -> impl Iterator<Item = DateTime<Utc>> {
    let step = query.granularity.as_secs().max(1);
    let count = query.window.as_secs() / step;
    (0..count).map(move |k| start + chrono::Duration::seconds((k * step) as i64))
}

/// Small mixed fleet with one example of most kinds of waste.
pub fn demo(now: DateTime<Utc>) -> FixtureDoc {
    let days = |n: i64| now - chrono::Duration::days(n);
    let mut doc = FixtureDoc::default();

    doc.push(ResourceRecord::Instance(InstanceRecord {
        id: "i-0a1b2c3d4e5f60001".into(),
        name: Some("test-worker".into()),
        instance_type: "t3.xlarge".into(),
        state: InstanceState::Running,
        launched_at: days(120),
        tags: BTreeMap::from([("env".into(), "test".into())]),
    }));
    doc.metric("i-0a1b2c3d4e5f60001", Metric::CpuUtilization, Pattern::Flat { value: 1.5 });

    doc.push(ResourceRecord::Instance(InstanceRecord {
        id: "i-0a1b2c3d4e5f60002".into(),
        name: Some("web-server".into()),
        instance_type: "m5.xlarge".into(),
        state: InstanceState::Running,
        launched_at: days(400),
        tags: BTreeMap::from([("env".into(), "prod".into())]),
    }));
    doc.metric(
        "i-0a1b2c3d4e5f60002",
        Metric::CpuUtilization,
        Pattern::Workday { low: 12.0, high: 24.0 },
    );

    doc.push(ResourceRecord::Instance(InstanceRecord {
        id: "i-0a1b2c3d4e5f60003".into(),
        name: Some("batch-runner".into()),
        instance_type: "c5.2xlarge".into(),
        state: InstanceState::Stopped,
        launched_at: days(30),
        tags: BTreeMap::new(),
    }));

    doc.push(ResourceRecord::Volume(VolumeRecord {
        id: "vol-0b1c2d3e4f5a60001".into(),
        name: Some("old-backup".into()),
        volume_type: "gp2".into(),
        size_gb: 500,
        state: VolumeState::Available,
        created_at: days(200),
        attached_instance: None,
        iops: None,
        tags: BTreeMap::new(),
    }));

    doc.push(ResourceRecord::Volume(VolumeRecord {
        id: "vol-0b1c2d3e4f5a60002".into(),
        name: Some("web-data".into()),
        volume_type: "io1".into(),
        size_gb: 200,
        state: VolumeState::InUse,
        created_at: days(400),
        attached_instance: Some("i-0a1b2c3d4e5f60002".into()),
        iops: Some(4000),
        tags: BTreeMap::new(),
    }));
    doc.metric("vol-0b1c2d3e4f5a60002", Metric::VolumeReadOps, Pattern::Flat { value: 40_000_000.0 });
    doc.metric("vol-0b1c2d3e4f5a60002", Metric::VolumeWriteOps, Pattern::Flat { value: 20_000_000.0 });

    doc.push(ResourceRecord::Volume(VolumeRecord {
        id: "vol-0b1c2d3e4f5a60003".into(),
        name: Some("test-worker-root".into()),
        volume_type: "gp2".into(),
        size_gb: 100,
        state: VolumeState::InUse,
        created_at: days(120),
        attached_instance: Some("i-0a1b2c3d4e5f60001".into()),
        iops: None,
        tags: BTreeMap::new(),
    }));
    doc.metric("vol-0b1c2d3e4f5a60003", Metric::VolumeReadOps, Pattern::Flat { value: 20.0 });
    doc.metric("vol-0b1c2d3e4f5a60003", Metric::VolumeWriteOps, Pattern::Flat { value: 0.0 });

    doc.push(ResourceRecord::Snapshot(SnapshotRecord {
        id: "snap-0c1d2e3f4a5b60001".into(),
        volume_id: Some("vol-0decommissioned".into()),
        size_gb: 50,
        started_at: days(800),
        description: Some("pre-migration backup".into()),
        backs_image: false,
        tags: BTreeMap::new(),
    }));

    doc.push(ResourceRecord::Snapshot(SnapshotRecord {
        id: "snap-0c1d2e3f4a5b60002".into(),
        volume_id: Some("vol-0b1c2d3e4f5a60003".into()),
        size_gb: 30,
        started_at: days(700),
        description: Some("Created by CreateImage(i-0a1b2c3d4e5f60001) for ami-0123".into()),
        backs_image: true,
        tags: BTreeMap::new(),
    }));

    doc.push(ResourceRecord::Database(DatabaseRecord {
        id: "staging-db".into(),
        instance_class: "db.t3.medium".into(),
        engine: "postgres".into(),
        status: "available".into(),
        allocated_storage_gb: 20,
        storage_type: "gp2".into(),
        created_at: days(300),
        tags: BTreeMap::new(),
    }));
    doc.metric("staging-db", Metric::CpuUtilization, Pattern::Flat { value: 0.8 });
    doc.metric("staging-db", Metric::DatabaseConnections, Pattern::Flat { value: 0.0 });
    doc.metric("staging-db", Metric::FreeStorageSpace, Pattern::Flat { value: 15.0 * GIB });

    doc.push(ResourceRecord::Database(DatabaseRecord {
        id: "reports-db".into(),
        instance_class: "db.m5.large".into(),
        engine: "mysql".into(),
        status: "available".into(),
        allocated_storage_gb: 500,
        storage_type: "gp2".into(),
        created_at: days(600),
        tags: BTreeMap::new(),
    }));
    doc.metric("reports-db", Metric::CpuUtilization, Pattern::Workday { low: 20.0, high: 45.0 });
    doc.metric("reports-db", Metric::DatabaseConnections, Pattern::Workday { low: 4.0, high: 30.0 });
    doc.metric("reports-db", Metric::FreeStorageSpace, Pattern::Flat { value: 480.0 * GIB });

    doc
}
