use super::{RuleOutcome, Rules, Verdict};
use crate::collect::{BackupSnapshot, VolumeSnapshot};
use crate::error::PricingError;
use crate::model::{
    AgeDistribution, EbsKind, Evidence, FindingKind, LineageEvidence, Money, Severity, SnapshotEvidence,
    VolumeEvidence, VolumeTypeEvidence,
};
use crate::pricing::{PriceKind, STANDARD_SNAPSHOT_TIER};
use crate::source::VolumeState;

const GP3: &str = "gp3";

pub(crate) fn volume_rules(rules: &Rules<'_>, volume: &VolumeSnapshot) -> Vec<(FindingKind, RuleOutcome)> {
    if volume.record.state == VolumeState::Available {
        return vec![(
            FindingKind::Ebs(EbsKind::UnattachedVolume),
            unattached_volume(rules, volume),
        )];
    }
    if !volume.is_attached() {
        // creating, deleting or in error: not a steady state worth judging
        return Vec::new();
    }
    vec![
        (FindingKind::Ebs(EbsKind::IdleVolume), idle_volume(rules, volume)),
        (FindingKind::Ebs(EbsKind::WrongVolumeType), wrong_volume_type(rules, volume)),
    ]
}

fn volume_evidence(volume: &VolumeSnapshot, total_ops: Option<f64>, monthly_cost: Money) -> Evidence {
    Evidence::Volume(VolumeEvidence {
        volume_type: volume.record.volume_type.clone(),
        size_gb: volume.record.size_gb,
        attached: volume.is_attached(),
        age_days: volume.age_days,
        attached_instance: volume.record.attached_instance.clone(),
        total_ops,
        monthly_cost,
    })
}

fn volume_cost(rules: &Rules<'_>, volume_type: &str, size_gb: u32) -> Result<Money, PricingError> {
    rules
        .pricing
        .monthly_storage_cost(PriceKind::Volume, volume_type, f64::from(size_gb), rules.region)
}

/// A detached volume is billed in full for nothing.
fn unattached_volume(rules: &Rules<'_>, volume: &VolumeSnapshot) -> RuleOutcome {
    let record = &volume.record;
    let cost = volume_cost(rules, &record.volume_type, record.size_gb)?;
    Ok(rules.finding(
        &record.id,
        record.name.as_deref(),
        FindingKind::Ebs(EbsKind::UnattachedVolume),
        rules.spend_severity(cost),
        cost,
        volume_evidence(volume, None, cost),
        format!(
            "Snapshot if needed, then delete this unattached {} volume ({} GB, {} days old)",
            record.volume_type, record.size_gb, volume.age_days
        ),
    ))
}

/// Attached but doing next to no I/O across the whole window.
fn idle_volume(rules: &Rules<'_>, volume: &VolumeSnapshot) -> RuleOutcome {
    let Some(ops) = volume.total_ops() else {
        return Ok(Verdict::Skipped("no I/O metrics"));
    };
    if !ops.covers(rules.thresholds.min_window_coverage) {
        return Ok(Verdict::Skipped("insufficient I/O coverage"));
    }
    let total = ops.sum();
    if total >= rules.thresholds.idle_volume_max_ops {
        return Ok(Verdict::Clean);
    }

    let record = &volume.record;
    let cost = volume_cost(rules, &record.volume_type, record.size_gb)?;
    Ok(rules.finding(
        &record.id,
        record.name.as_deref(),
        FindingKind::Ebs(EbsKind::IdleVolume),
        rules.spend_severity(cost),
        cost,
        volume_evidence(volume, Some(total), cost),
        format!(
            "Detach and delete: {total:.0} I/O operations in {} days on a {} GB {} volume",
            ops.window_days(),
            record.size_gb,
            record.volume_type
        ),
    ))
}

/// gp2 always moves to gp3. io1/io2 moves to gp3 when observed p95 IOPS
/// fits the gp3 baseline and the provisioned IOPS are within gp3 reach.
fn wrong_volume_type(rules: &Rules<'_>, volume: &VolumeSnapshot) -> RuleOutcome {
    let record = &volume.record;
    let thresholds = rules.thresholds;

    let observed_p95_iops = match record.volume_type.as_str() {
        "gp2" => None,
        "io1" | "io2" => {
            if record
                .iops
                .is_some_and(|iops| iops >= thresholds.io_provisioned_iops_ceiling)
            {
                return Ok(Verdict::Clean);
            }
            let Some(ops) = volume.total_ops() else {
                return Ok(Verdict::Skipped("no I/O metrics"));
            };
            if !ops.covers(thresholds.min_window_coverage) {
                return Ok(Verdict::Skipped("insufficient I/O coverage"));
            }
            let seconds = ops.granularity().as_secs_f64().max(1.0);
            let p95 = ops.percentile(95.0).unwrap_or(0.0) / seconds;
            if p95 > thresholds.gp3_baseline_iops {
                return Ok(Verdict::Clean);
            }
            Some(p95)
        }
        _ => return Ok(Verdict::Clean),
    };

    let current = volume_cost(rules, &record.volume_type, record.size_gb)?;
    let recommended = volume_cost(rules, GP3, record.size_gb)?;
    let savings = current.saturating_sub(recommended);

    let recommendation = match observed_p95_iops {
        Some(p95) => format!(
            "Migrate from {} to {GP3}: p95 of {p95:.0} IOPS fits the {GP3} baseline of {:.0}",
            record.volume_type, thresholds.gp3_baseline_iops
        ),
        None => format!("Migrate from {} to {GP3}: same baseline performance at a lower price", record.volume_type),
    };
    Ok(rules.finding(
        &record.id,
        record.name.as_deref(),
        FindingKind::Ebs(EbsKind::WrongVolumeType),
        rules.spend_severity(savings),
        savings,
        Evidence::VolumeType(VolumeTypeEvidence {
            current_type: record.volume_type.clone(),
            recommended_type: GP3.to_string(),
            size_gb: record.size_gb,
            provisioned_iops: record.iops,
            observed_p95_iops,
            current_cost: current,
            recommended_cost: recommended,
        }),
        recommendation,
    ))
}

/// Older than the retention window and not backing a machine image.
pub(crate) fn ancient_snapshot(rules: &Rules<'_>, backup: &BackupSnapshot) -> (FindingKind, RuleOutcome) {
    let kind = FindingKind::Ebs(EbsKind::AncientSnapshot);
    let record = &backup.record;
    if backup.age_days <= rules.thresholds.snapshot_retention_days || record.in_restore_use() {
        return (kind, Ok(Verdict::Clean));
    }

    let outcome = rules
        .pricing
        .monthly_storage_cost(
            PriceKind::Snapshot,
            STANDARD_SNAPSHOT_TIER,
            f64::from(record.size_gb),
            rules.region,
        )
        .map(|cost| {
            rules.finding(
                &record.id,
                None,
                kind,
                rules.spend_severity(cost),
                cost,
                Evidence::Snapshot(SnapshotEvidence {
                    size_gb: record.size_gb,
                    age_days: backup.age_days,
                    source_volume: record.volume_id.clone(),
                    description: record.description.clone(),
                    monthly_cost: cost,
                }),
                format!(
                    "Delete or archive this {} GB snapshot taken {} days ago",
                    record.size_gb, backup.age_days
                ),
            )
        });
    (kind, outcome)
}

/// More snapshots of one volume than a lifecycle policy would keep. The
/// newest `max_snapshots_per_volume` stay; the older ones, except those
/// behind an image, are the waste.
pub(crate) fn excessive_snapshots(
    rules: &Rules<'_>,
    volume_id: &str,
    backups: &[&BackupSnapshot],
) -> (FindingKind, RuleOutcome) {
    let kind = FindingKind::Ebs(EbsKind::ExcessiveSnapshots);
    let keep = rules.thresholds.max_snapshots_per_volume;
    if backups.len() <= keep {
        return (kind, Ok(Verdict::Clean));
    }

    let mut newest_first = backups.to_vec();
    newest_first.sort_by(|a, b| a.age_days.cmp(&b.age_days).then_with(|| a.record.id.cmp(&b.record.id)));
    let excess_size_gb: u64 = newest_first[keep..]
        .iter()
        .filter(|backup| !backup.record.in_restore_use())
        .map(|backup| u64::from(backup.record.size_gb))
        .sum();
    let total_size_gb: u64 = backups.iter().map(|backup| u64::from(backup.record.size_gb)).sum();
    let ages: AgeDistribution = backups.iter().map(|backup| backup.age_days).collect();
    let oldest_age_days = backups.iter().map(|backup| backup.age_days).max().unwrap_or(0);

    let outcome = rules
        .pricing
        .monthly_storage_cost(
            PriceKind::Snapshot,
            STANDARD_SNAPSHOT_TIER,
            excess_size_gb as f64,
            rules.region,
        )
        .map(|cost| {
            rules.finding(
                volume_id,
                None,
                kind,
                rules.spend_severity(cost).max(Severity::Medium),
                cost,
                Evidence::SnapshotLineage(LineageEvidence {
                    source_volume: volume_id.to_string(),
                    snapshot_count: backups.len(),
                    retained: keep,
                    total_size_gb,
                    excess_size_gb,
                    oldest_age_days,
                    ages,
                    monthly_cost: cost,
                }),
                format!(
                    "Add a lifecycle policy: {} snapshots of this volume, keeping the newest {keep} frees {excess_size_gb} GB",
                    backups.len()
                ),
            )
        });
    (kind, outcome)
}
