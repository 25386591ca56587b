use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::{fetch_series, list_all, CollectContext, Collector, InstanceSnapshot, ResourceSnapshot};
use crate::error::{CollectorError, SourceError};
use crate::model::ResourceFamily;
use crate::source::{InstanceState, InventoryKind, Metric, ResourceRecord};

/// All instances regardless of state; CPU only for running ones.
pub struct Ec2Collector;

#[async_trait]
impl Collector for Ec2Collector {
    fn family(&self) -> ResourceFamily {
        ResourceFamily::Ec2
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, CollectorError> {
        let fail = |e: SourceError| CollectorError::from_source(ResourceFamily::Ec2, e);

        let instances: Vec<_> = list_all(ctx, InventoryKind::Instances)
            .await
            .map_err(fail)?
            .into_iter()
            .filter_map(|record| match record {
                ResourceRecord::Instance(instance) => Some(instance),
                _ => None,
            })
            .collect();

        let snapshots: Vec<ResourceSnapshot> = stream::iter(instances)
            .map(|record| async move {
                let cpu = if record.state == InstanceState::Running {
                    Some(fetch_series(ctx, &record.id, Metric::CpuUtilization, ctx.settings.granularity).await?)
                } else {
                    None
                };
                Ok::<_, SourceError>(ResourceSnapshot::Instance(InstanceSnapshot {
                    uptime_days: ctx.age_days(record.launched_at),
                    record,
                    cpu,
                }))
            })
            .buffer_unordered(ctx.settings.metric_concurrency.max(1))
            .try_collect()
            .await
            .map_err(fail)?;

        debug!(region = %ctx.target.region, instances = snapshots.len(), "ec2 collected");
        Ok(snapshots)
    }
}
