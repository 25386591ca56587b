use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::{fetch_series, list_all, CollectContext, Collector, DatabaseSnapshot, ResourceSnapshot};
use crate::error::{CollectorError, SourceError};
use crate::model::ResourceFamily;
use crate::source::{InventoryKind, Metric, ResourceRecord};

/// Database instances with CPU, connection and free-storage series for
/// those that are available.
pub struct RdsCollector;

#[async_trait]
impl Collector for RdsCollector {
    fn family(&self) -> ResourceFamily {
        ResourceFamily::Rds
    }

    async fn collect(&self, ctx: &CollectContext) -> Result<Vec<ResourceSnapshot>, CollectorError> {
        let fail = |e: SourceError| CollectorError::from_source(ResourceFamily::Rds, e);

        let databases: Vec<_> = list_all(ctx, InventoryKind::Databases)
            .await
            .map_err(fail)?
            .into_iter()
            .filter_map(|record| match record {
                ResourceRecord::Database(database) => Some(database),
                _ => None,
            })
            .collect();

        let snapshots: Vec<ResourceSnapshot> = stream::iter(databases)
            .map(|record| async move {
                let granularity = ctx.settings.granularity;
                let (cpu, connections, free_storage) = if record.is_available() {
                    let (cpu, connections, free) = tokio::try_join!(
                        fetch_series(ctx, &record.id, Metric::CpuUtilization, granularity),
                        fetch_series(ctx, &record.id, Metric::DatabaseConnections, granularity),
                        fetch_series(ctx, &record.id, Metric::FreeStorageSpace, granularity),
                    )?;
                    (Some(cpu), Some(connections), Some(free))
                } else {
                    (None, None, None)
                };
                Ok::<_, SourceError>(ResourceSnapshot::Database(DatabaseSnapshot {
                    age_days: ctx.age_days(record.created_at),
                    record,
                    cpu,
                    connections,
                    free_storage,
                }))
            })
            .buffer_unordered(ctx.settings.metric_concurrency.max(1))
            .try_collect()
            .await
            .map_err(fail)?;

        debug!(region = %ctx.target.region, databases = snapshots.len(), "rds collected");
        Ok(snapshots)
    }
}
