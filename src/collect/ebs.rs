use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::{fetch_series, list_all, BackupSnapshot, CollectContext, Collector, ResourceSnapshot, VolumeSnapshot};
use crate::error::{CollectorError, SourceError};
use crate::model::ResourceFamily;
use crate::source::{InventoryKind, Metric, ResourceRecord, VolumeRecord, VolumeState};

/// Volumes plus the snapshot sub-collector. I/O counters are fetched for
/// attached volumes only, at the coarser I/O granularity.
pub struct EbsCollector;

impl EbsCollector {
    async fn volumes(ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, SourceError> {
        let volumes: Vec<VolumeRecord> = list_all(ctx, InventoryKind::Volumes)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                ResourceRecord::Volume(volume) => Some(volume),
                _ => None,
            })
            .collect();

        stream::iter(volumes)
            .map(|record| async move {
                let granularity = ctx.settings.io_granularity;
                let (read_ops, write_ops) = if record.state == VolumeState::InUse {
                    let (reads, writes) = tokio::try_join!(
                        fetch_series(ctx, &record.id, Metric::VolumeReadOps, granularity),
                        fetch_series(ctx, &record.id, Metric::VolumeWriteOps, granularity),
                    )?;
                    (Some(reads), Some(writes))
                } else {
                    (None, None)
                };
                Ok::<_, SourceError>(ResourceSnapshot::Volume(VolumeSnapshot {
                    age_days: ctx.age_days(record.created_at),
                    record,
                    read_ops,
                    write_ops,
                }))
            })
            .buffer_unordered(ctx.settings.metric_concurrency.max(1))
            .try_collect()
            .await
    }

    async fn snapshots(ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, SourceError> {
        let snapshots = list_all(ctx, InventoryKind::Snapshots)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                ResourceRecord::Snapshot(snapshot) => Some(ResourceSnapshot::Snapshot(BackupSnapshot {
                    age_days: ctx.age_days(snapshot.started_at),
                    record: snapshot,
                })),
                _ => None,
            })
            .collect();
        Ok(snapshots)
    }
}

#[async_trait]
impl Collector for EbsCollector {
    fn family(&self) -> ResourceFamily {
        ResourceFamily::Ebs
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, CollectorError> {
        let (mut volumes, snapshots) = tokio::try_join!(Self::volumes(ctx), Self::snapshots(ctx))
            .map_err(|e| CollectorError::from_source(ResourceFamily::Ebs, e))?;

        debug!(
            region = %ctx.target.region,
            volumes = volumes.len(),
            snapshots = snapshots.len(),
            "ebs collected"
        );
        volumes.extend(snapshots);
        Ok(volumes)
    }
}
