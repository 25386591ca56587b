use super::compute::{database_sizing, oversized, Utilization};
use super::{depth_severity, RuleOutcome, Rules, Verdict};
use crate::collect::DatabaseSnapshot;
use crate::model::{Evidence, FindingKind, RdsKind, StorageEvidence};
use crate::pricing::PriceKind;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub(crate) fn database_rules(rules: &Rules<'_>, database: &DatabaseSnapshot) -> Vec<(FindingKind, RuleOutcome)> {
    let record = &database.record;
    let mut outcomes = Vec::new();

    if let (Some(cpu), Some(connections)) = (&database.cpu, &database.connections) {
        match Utilization::of(cpu, rules.thresholds) {
            Some(utilization) => {
                let peak_connections = connections.max();
                let idle = utilization.is_idle(rules.thresholds)
                    && peak_connections.is_some_and(|peak| peak <= rules.thresholds.idle_db_max_connections);
                outcomes.push((
                    FindingKind::Rds(RdsKind::IdleDatabase),
                    idle_database(rules, database, &utilization, peak_connections, idle),
                ));
                outcomes.push((
                    FindingKind::Rds(RdsKind::OversizedDatabase),
                    oversized(
                        rules,
                        database_sizing(&record.id, &record.instance_class),
                        &utilization,
                    ),
                ));
            }
            None => {
                for kind in [RdsKind::IdleDatabase, RdsKind::OversizedDatabase] {
                    outcomes.push((FindingKind::Rds(kind), Ok(Verdict::Skipped("insufficient CPU coverage"))));
                }
            }
        }
    }

    if database.free_storage.is_some() {
        outcomes.push((
            FindingKind::Rds(RdsKind::OverprovisionedStorage),
            overprovisioned_storage(rules, database),
        ));
    }
    outcomes
}

/// Near-zero CPU and no connections for the whole window. The instance and
/// its storage are both waste.
fn idle_database(
    rules: &Rules<'_>,
    database: &DatabaseSnapshot,
    utilization: &Utilization,
    peak_connections: Option<f64>,
    idle: bool,
) -> RuleOutcome {
    if peak_connections.is_none() {
        return Ok(Verdict::Skipped("no connection metrics"));
    }
    if !idle {
        return Ok(Verdict::Clean);
    }
    let record = &database.record;
    let instance = rules
        .pricing
        .monthly_instance_cost(PriceKind::Database, &record.instance_class, rules.region)?;
    let storage = rules.pricing.monthly_storage_cost(
        PriceKind::DatabaseStorage,
        &record.storage_type,
        f64::from(record.allocated_storage_gb),
        rules.region,
    )?;
    let cost = instance + storage;
    let severity = rules
        .spend_severity(cost)
        .max(depth_severity(utilization.average, rules.thresholds));

    Ok(rules.finding(
        &record.id,
        None,
        FindingKind::Rds(RdsKind::IdleDatabase),
        severity,
        cost,
        Evidence::Utilization(utilization.evidence(
            &record.instance_class,
            Some(database.age_days),
            peak_connections,
            cost,
        )),
        format!(
            "Snapshot and delete this {} {} database: CPU averaged {:.1}% with no connections over {} days",
            record.engine, record.instance_class, utilization.average, utilization.window_days
        ),
    ))
}

/// Most of the allocated storage has never been used.
fn overprovisioned_storage(rules: &Rules<'_>, database: &DatabaseSnapshot) -> RuleOutcome {
    let record = &database.record;
    let thresholds = rules.thresholds;
    let allocated = record.allocated_storage_gb;
    if allocated < thresholds.rds_min_allocated_gb {
        return Ok(Verdict::Clean);
    }
    let Some(min_free) = database.free_storage.as_ref().and_then(|s| s.min()) else {
        return Ok(Verdict::Skipped("no free storage metrics"));
    };

    let used_gb = (f64::from(allocated) - min_free / BYTES_PER_GB).max(0.0);
    if used_gb / f64::from(allocated) >= thresholds.rds_storage_utilization_threshold {
        return Ok(Verdict::Clean);
    }
    let recommended_gb = ((used_gb * thresholds.rds_storage_headroom).ceil() as u32).max(thresholds.rds_min_allocated_gb);
    if recommended_gb >= allocated {
        return Ok(Verdict::Clean);
    }

    let price = |gb: u32| {
        rules.pricing.monthly_storage_cost(
            PriceKind::DatabaseStorage,
            &record.storage_type,
            f64::from(gb),
            rules.region,
        )
    };
    let current = price(allocated)?;
    let recommended = price(recommended_gb)?;
    let savings = current.saturating_sub(recommended);

    Ok(rules.finding(
        &record.id,
        None,
        FindingKind::Rds(RdsKind::OverprovisionedStorage),
        rules.spend_severity(savings),
        savings,
        Evidence::Storage(StorageEvidence {
            storage_type: record.storage_type.clone(),
            allocated_gb: allocated,
            used_gb,
            recommended_gb,
            current_cost: current,
            recommended_cost: recommended,
        }),
        format!(
            "Migrate to a {recommended_gb} GB instance: {used_gb:.1} GB of {allocated} GB allocated is in use"
        ),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::collect::ResourceSnapshot;
    use crate::engine::tests::{engine, epoch, flat};
    use crate::model::{ScanId, Severity};
    use crate::source::DatabaseRecord;

    fn database(class: &str, allocated_gb: u32, cpu: f64, connections: f64, free_gb: f64) -> ResourceSnapshot {
        ResourceSnapshot::Database(DatabaseSnapshot {
            record: DatabaseRecord {
                id: "db-1".into(),
                instance_class: class.into(),
                engine: "postgres".into(),
                status: "available".into(),
                allocated_storage_gb: allocated_gb,
                storage_type: "gp2".into(),
                created_at: epoch(),
                tags: BTreeMap::new(),
            },
            age_days: 200,
            cpu: Some(flat(cpu)),
            connections: Some(flat(connections)),
            free_storage: Some(flat(free_gb * BYTES_PER_GB)),
        })
    }

    fn found(snapshot: &ResourceSnapshot) -> Vec<(FindingKind, i64)> {
        engine()
            .classify(ScanId::new(), "us-east-1", snapshot)
            .findings
            .iter()
            .map(|f| (f.kind(), f.monthly_savings().cents()))
            .collect()
    }

    #[test]
    fn idle_database_counts_instance_and_storage() {
        let snapshot = database("db.t3.medium", 20, 0.8, 0.0, 15.0);
        let out = engine().classify(ScanId::new(), "us-east-1", &snapshot);
        let finding = &out.findings[0];
        assert_eq!(finding.kind(), FindingKind::Rds(RdsKind::IdleDatabase));
        // 0.068 * 730 + 20 * 0.115
        assert_eq!(finding.monthly_savings().cents(), 4964 + 230);
        assert_eq!(finding.severity(), Severity::Critical);
    }

    #[test]
    fn idle_database_is_also_checked_for_size() {
        let snapshot = database("db.t3.medium", 20, 0.8, 0.0, 15.0);
        // 0.068 * 730 - 0.034 * 730
        assert_eq!(
            found(&snapshot),
            vec![
                (FindingKind::Rds(RdsKind::IdleDatabase), 4964 + 230),
                (FindingKind::Rds(RdsKind::OversizedDatabase), 4964 - 2482),
            ]
        );
    }

    #[test]
    fn connected_database_is_not_idle_but_may_shrink() {
        let snapshot = database("db.m5.xlarge", 20, 3.0, 12.0, 15.0);
        assert_eq!(
            found(&snapshot),
            vec![(FindingKind::Rds(RdsKind::OversizedDatabase), 24966 - 12483)]
        );
    }

    #[test]
    fn mostly_empty_storage_is_trimmed_to_the_floor() {
        let snapshot = database("db.m5.large", 500, 40.0, 30.0, 480.0);
        // 20 GB used, 1.5x headroom is 30 GB, floor is 100 GB
        assert_eq!(
            found(&snapshot),
            vec![(FindingKind::Rds(RdsKind::OverprovisionedStorage), 5750 - 1150)]
        );
    }

    #[test]
    fn small_or_busy_storage_is_left_alone() {
        assert!(found(&database("db.m5.large", 80, 40.0, 30.0, 75.0)).is_empty());
        assert!(found(&database("db.m5.large", 500, 40.0, 30.0, 300.0)).is_empty());
    }
}
