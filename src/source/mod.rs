//! Logical query contracts for the external inventory and metrics services.
//!
//! Transport, auth and wire-level pagination belong to the implementations.
//! The engine only sees pages of typed records and metric datapoints.

pub mod fixture;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::model::ScanTarget;
use crate::series::Datapoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryKind {
    Instances,
    Volumes,
    Snapshots,
    Databases,
}

impl InventoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryKind::Instances => "instances",
            InventoryKind::Volumes => "volumes",
            InventoryKind::Snapshots => "snapshots",
            InventoryKind::Databases => "databases",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub instance_type: String,
    pub state: InstanceState,
    pub launched_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub volume_type: String,
    pub size_gb: u32,
    pub state: VolumeState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attached_instance: Option<String>,
    #[serde(default)]
    pub iops: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    #[serde(default)]
    pub volume_id: Option<String>,
    pub size_gb: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    /// Registered as the backing store of a machine image.
    #[serde(default)]
    pub backs_image: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl SnapshotRecord {
    /// A snapshot behind an image can be restored at any launch.
    pub fn in_restore_use(&self) -> bool {
        self.backs_image
            || self
                .description
                .as_deref()
                .map(|d| d.to_ascii_lowercase().contains("createimage"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: String,
    pub instance_class: String,
    pub engine: String,
    pub status: String,
    pub allocated_storage_gb: u32,
    pub storage_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl DatabaseRecord {
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRecord {
    Instance(InstanceRecord),
    Volume(VolumeRecord),
    Snapshot(SnapshotRecord),
    Database(DatabaseRecord),
}

impl ResourceRecord {
    pub fn id(&self) -> &str {
        match self {
            ResourceRecord::Instance(r) => &r.id,
            ResourceRecord::Volume(r) => &r.id,
            ResourceRecord::Snapshot(r) => &r.id,
            ResourceRecord::Database(r) => &r.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRequest {
    pub target: ScanTarget,
    pub kind: InventoryKind,
}

#[derive(Debug, Clone, Default)]
pub struct InventoryPage {
    pub records: Vec<ResourceRecord>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuUtilization,
    DatabaseConnections,
    FreeStorageSpace,
    VolumeReadOps,
    VolumeWriteOps,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::CpuUtilization => "CPUUtilization",
            Metric::DatabaseConnections => "DatabaseConnections",
            Metric::FreeStorageSpace => "FreeStorageSpace",
            Metric::VolumeReadOps => "VolumeReadOps",
            Metric::VolumeWriteOps => "VolumeWriteOps",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub target: ScanTarget,
    pub resource_id: String,
    pub metric: Metric,
    pub end: DateTime<Utc>,
    pub window: Duration,
    pub granularity: Duration,
}

impl MetricQuery {
    pub fn start(&self) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        self.end - window
    }
}

/// `listResources(region, family)`: one page per call, `page_token` from
/// the previous page's `next_token`.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_resources(
        &self,
        request: &InventoryRequest,
        page_token: Option<&str>,
    ) -> Result<InventoryPage, SourceError>;
}

/// `getTimeSeries(resourceId, metricName, window, granularity)`.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_time_series(&self, query: &MetricQuery) -> Result<Vec<Datapoint>, SourceError>;
}

#[derive(Clone)]
pub struct Sources {
    pub inventory: Arc<dyn InventorySource>,
    pub metrics: Arc<dyn MetricsSource>,
}

impl Sources {
    /// One object serving both contracts.
    pub fn shared<S>(source: Arc<S>) -> Self
    where
        S: InventorySource + MetricsSource + 'static,
    {
        Sources {
            inventory: source.clone(),
            metrics: source,
        }
    }
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sources").finish_non_exhaustive()
    }
}
