pub mod ebs;
pub mod ec2;
pub mod rds;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ScanSettings;
use crate::error::{CollectorError, SourceError};
use crate::model::{ResourceFamily, ScanTarget};
use crate::series::Series;
use crate::source::retry::RetryRunner;
use crate::source::{
    DatabaseRecord, InstanceRecord, InventoryKind, InventoryRequest, Metric, MetricQuery, ResourceRecord,
    SnapshotRecord, Sources, VolumeRecord,
};

/// Everything a collector needs for one scan. Built once per scan and
/// shared read-only between that scan's collector tasks.
#[derive(Debug, Clone)]
pub struct CollectContext {
    pub target: ScanTarget,
    pub sources: Sources,
    pub settings: ScanSettings,
    pub retry: RetryRunner,
    /// End of every metrics window and the reference point for ages.
    pub observed_at: DateTime<Utc>,
}

impl CollectContext {
    pub fn age_days(&self, since: DateTime<Utc>) -> i64 {
        (self.observed_at - since).num_days().max(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSnapshot {
    pub record: InstanceRecord,
    pub uptime_days: i64,
    /// `None` when the instance was not running and no metrics were fetched.
    pub cpu: Option<Series>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSnapshot {
    pub record: VolumeRecord,
    pub age_days: i64,
    /// Read and write operation counts, only for attached volumes.
    pub read_ops: Option<Series>,
    pub write_ops: Option<Series>,
}

impl VolumeSnapshot {
    pub fn is_attached(&self) -> bool {
        self.record.state == crate::source::VolumeState::InUse || self.record.attached_instance.is_some()
    }

    /// Read + write operations per sample.
    pub fn total_ops(&self) -> Option<Series> {
        match (&self.read_ops, &self.write_ops) {
            (Some(reads), Some(writes)) => Some(reads.combine(writes)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupSnapshot {
    pub record: SnapshotRecord,
    pub age_days: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSnapshot {
    pub record: DatabaseRecord,
    pub age_days: i64,
    pub cpu: Option<Series>,
    pub connections: Option<Series>,
    /// Free storage in bytes.
    pub free_storage: Option<Series>,
}

/// The per-resource bundle handed to the decision engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSnapshot {
    Instance(InstanceSnapshot),
    Volume(VolumeSnapshot),
    Snapshot(BackupSnapshot),
    Database(DatabaseSnapshot),
}

impl ResourceSnapshot {
    pub fn id(&self) -> &str {
        match self {
            ResourceSnapshot::Instance(s) => &s.record.id,
            ResourceSnapshot::Volume(s) => &s.record.id,
            ResourceSnapshot::Snapshot(s) => &s.record.id,
            ResourceSnapshot::Database(s) => &s.record.id,
        }
    }

    pub fn family(&self) -> ResourceFamily {
        match self {
            ResourceSnapshot::Instance(_) => ResourceFamily::Ec2,
            ResourceSnapshot::Volume(_) | ResourceSnapshot::Snapshot(_) => ResourceFamily::Ebs,
            ResourceSnapshot::Database(_) => ResourceFamily::Rds,
        }
    }
}

/// Gathers inventory and evidence for one resource family. Either returns
/// every resource of the family or fails as a whole.
#[async_trait]
pub trait Collector: Send + Sync {
    fn family(&self) -> ResourceFamily;

    fn name(&self) -> &'static str {
        self.family().as_str()
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, CollectorError>;
}

pub fn default_collectors() -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(ec2::Ec2Collector),
        Arc::new(ebs::EbsCollector),
        Arc::new(rds::RdsCollector),
    ]
}

/// Follows continuation tokens until the source reports no more pages.
/// A token seen twice or more than `max_pages` pages is a pagination error
/// rather than a silently truncated inventory.
pub async fn list_all(ctx: &CollectContext, kind: InventoryKind) -> Result<Vec<ResourceRecord>, SourceError> {
    let request = InventoryRequest {
        target: ctx.target.clone(),
        kind,
    };
    let inventory = &ctx.sources.inventory;
    let request = &request;

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if pages >= ctx.settings.max_pages {
            return Err(SourceError::Pagination(format!(
                "{} listing exceeded {} pages",
                kind.as_str(),
                ctx.settings.max_pages
            )));
        }
        let current = token.as_deref();
        let page = ctx
            .retry
            .run(kind.as_str(), move |_| async move {
                inventory.list_resources(request, current).await
            })
            .await?;
        pages += 1;
        records.extend(page.records);

        match page.next_token {
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(SourceError::Pagination(format!(
                        "{} listing repeated token '{next}'",
                        kind.as_str()
                    )));
                }
                token = Some(next);
            }
            None => break,
        }
    }

    debug!(region = %ctx.target.region, kind = kind.as_str(), pages, records = records.len(), "inventory listed");
    Ok(records)
}

/// One metric over the scan window. A resource the metrics service has
/// never heard of has an empty series, not an error.
pub async fn fetch_series(
    ctx: &CollectContext,
    resource_id: &str,
    metric: Metric,
    granularity: Duration,
) -> Result<Series, SourceError> {
    let query = MetricQuery {
        target: ctx.target.clone(),
        resource_id: resource_id.to_string(),
        metric,
        end: ctx.observed_at,
        window: ctx.settings.window,
        granularity,
    };
    let metrics = &ctx.sources.metrics;
    let query = &query;

    match ctx
        .retry
        .run(metric.name(), move |_| async move { metrics.get_time_series(query).await })
        .await
    {
        Ok(points) => Ok(Series::new(ctx.settings.window, granularity, points)),
        Err(SourceError::NotFound(_)) => Ok(Series::empty(ctx.settings.window, granularity)),
        Err(e) => Err(e),
    }
}
