//! Pure classification of resource snapshots into findings.
//!
//! Rules see one snapshot, the price book and the thresholds, nothing else:
//! no clock, no I/O. A rule that lacks the evidence to decide is skipped,
//! and a rule whose price is missing reports a pricing gap. Neither ever
//! produces a finding.

pub mod compute;
pub mod database;
pub mod storage;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::collect::{BackupSnapshot, ResourceSnapshot};
use crate::config::{SeverityBands, Thresholds};
use crate::error::PricingError;
use crate::model::{Evidence, Finding, FindingKind, Money, ScanId, Severity};
use crate::pricing::PricingTable;

/// What one rule concluded about one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Finding(Finding),
    /// The rule does not apply or found nothing worth saving.
    Clean,
    /// Not enough evidence to decide.
    Skipped(&'static str),
}

pub type RuleOutcome = Result<Verdict, PricingError>;

/// Inputs shared by every rule while classifying one snapshot.
pub struct Rules<'a> {
    pub scan_id: ScanId,
    pub region: &'a str,
    pub pricing: &'a PricingTable,
    pub thresholds: &'a Thresholds,
}

impl Rules<'_> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn finding(
        &self,
        resource_id: &str,
        resource_name: Option<&str>,
        kind: FindingKind,
        severity: Severity,
        monthly_savings: Money,
        evidence: Evidence,
        recommendation: String,
    ) -> Verdict {
        Finding::new(
            self.scan_id,
            resource_id,
            resource_name,
            kind,
            severity,
            monthly_savings,
            evidence,
            recommendation,
        )
        .map_or(Verdict::Clean, Verdict::Finding)
    }

    pub(crate) fn spend_severity(&self, savings: Money) -> Severity {
        spend_severity(savings, &self.thresholds.bands)
    }
}

/// Severity from monthly savings. Bands are strict lower bounds.
pub fn spend_severity(savings: Money, bands: &SeverityBands) -> Severity {
    let dollars = savings.as_dollars();
    if dollars > bands.critical {
        Severity::Critical
    } else if dollars > bands.high {
        Severity::High
    } else if dollars > bands.medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Severity from how far below the idle threshold the average sits.
pub fn depth_severity(average: f64, thresholds: &Thresholds) -> Severity {
    if average < thresholds.idle_critical_cpu_percent {
        Severity::Critical
    } else if average < thresholds.idle_high_cpu_percent {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub findings: Vec<Finding>,
    /// `resource: reason` for every finding dropped for lack of a price.
    pub pricing_gaps: Vec<String>,
    /// `resource: rule: reason` for every rule skipped for lack of evidence.
    pub skipped: Vec<String>,
}

impl Classification {
    fn absorb(&mut self, resource_id: &str, kind: FindingKind, outcome: RuleOutcome) {
        match outcome {
            Ok(Verdict::Finding(finding)) => self.findings.push(finding),
            Ok(Verdict::Clean) => {}
            Ok(Verdict::Skipped(reason)) => {
                debug!(resource_id, rule = kind.as_str(), reason, "rule skipped");
                self.skipped.push(format!("{resource_id}: {kind}: {reason}"));
            }
            Err(gap) => {
                debug!(resource_id, rule = kind.as_str(), error = %gap, "pricing gap");
                self.pricing_gaps.push(format!("{resource_id}: {gap}"));
            }
        }
    }

    pub fn merge(&mut self, other: Classification) {
        self.findings.extend(other.findings);
        self.pricing_gaps.extend(other.pricing_gaps);
        self.skipped.extend(other.skipped);
    }
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    pricing: Arc<PricingTable>,
    thresholds: Arc<Thresholds>,
}

impl DecisionEngine {
    pub fn new(pricing: Arc<PricingTable>, thresholds: Arc<Thresholds>) -> Self {
        DecisionEngine { pricing, thresholds }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn rules<'a>(&'a self, scan_id: ScanId, region: &'a str) -> Rules<'a> {
        Rules {
            scan_id,
            region,
            pricing: &self.pricing,
            thresholds: &self.thresholds,
        }
    }

    /// Every applicable rule runs independently; a resource can produce
    /// more than one finding.
    pub fn classify(&self, scan_id: ScanId, region: &str, snapshot: &ResourceSnapshot) -> Classification {
        let rules = self.rules(scan_id, region);
        let mut out = Classification::default();
        let id = snapshot.id();

        match snapshot {
            ResourceSnapshot::Instance(instance) => {
                for (kind, outcome) in compute::instance_rules(&rules, instance) {
                    out.absorb(id, kind, outcome);
                }
            }
            ResourceSnapshot::Volume(volume) => {
                for (kind, outcome) in storage::volume_rules(&rules, volume) {
                    out.absorb(id, kind, outcome);
                }
            }
            ResourceSnapshot::Snapshot(backup) => {
                let (kind, outcome) = storage::ancient_snapshot(&rules, backup);
                out.absorb(id, kind, outcome);
            }
            ResourceSnapshot::Database(database) => {
                for (kind, outcome) in database::database_rules(&rules, database) {
                    out.absorb(id, kind, outcome);
                }
            }
        }
        out
    }

    /// Classifies each snapshot, then runs the rules that look across
    /// resources: snapshots grouped by their source volume.
    pub fn classify_all(&self, scan_id: ScanId, region: &str, snapshots: &[ResourceSnapshot]) -> Classification {
        let mut out = Classification::default();
        let mut lineages: BTreeMap<&str, Vec<&BackupSnapshot>> = BTreeMap::new();
        for snapshot in snapshots {
            out.merge(self.classify(scan_id, region, snapshot));
            if let ResourceSnapshot::Snapshot(backup) = snapshot {
                if let Some(volume_id) = backup.record.volume_id.as_deref() {
                    lineages.entry(volume_id).or_default().push(backup);
                }
            }
        }

        let rules = self.rules(scan_id, region);
        for (volume_id, backups) in lineages {
            let (kind, outcome) = storage::excessive_snapshots(&rules, volume_id, &backups);
            out.absorb(volume_id, kind, outcome);
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::collect::{BackupSnapshot, InstanceSnapshot, VolumeSnapshot};
    use crate::model::{EbsKind, Ec2Kind};
    use crate::series::{Datapoint, Series};
    use crate::source::{InstanceRecord, InstanceState, SnapshotRecord, VolumeRecord, VolumeState};

    pub(crate) const HOUR: Duration = Duration::from_secs(3600);
    pub(crate) const DAY: Duration = Duration::from_secs(86_400);
    pub(crate) const WINDOW: Duration = Duration::from_secs(14 * 86_400);

    pub(crate) fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    /// Samples every `granularity` across the default window.
    pub(crate) fn series(granularity: Duration, value: impl Fn(usize) -> f64) -> Series {
        let step = granularity.as_secs() as usize;
        let count = WINDOW.as_secs() as usize / step;
        let points = (0..count)
            .map(|i| Datapoint::new(epoch() + chrono::Duration::seconds((i * step) as i64), value(i)))
            .collect();
        Series::new(WINDOW, granularity, points)
    }

    pub(crate) fn flat(value: f64) -> Series {
        series(HOUR, |_| value)
    }

    pub(crate) fn engine() -> DecisionEngine {
        DecisionEngine::new(Arc::new(PricingTable::builtin()), Arc::new(Thresholds::default()))
    }

    pub(crate) fn instance(tier: &str, cpu: Option<Series>) -> ResourceSnapshot {
        ResourceSnapshot::Instance(InstanceSnapshot {
            record: InstanceRecord {
                id: "i-1".into(),
                name: Some("worker".into()),
                instance_type: tier.into(),
                state: if cpu.is_some() {
                    InstanceState::Running
                } else {
                    InstanceState::Stopped
                },
                launched_at: epoch(),
                tags: BTreeMap::new(),
            },
            uptime_days: 40,
            cpu,
        })
    }

    pub(crate) fn volume(volume_type: &str, size_gb: u32, state: VolumeState) -> VolumeSnapshot {
        VolumeSnapshot {
            record: VolumeRecord {
                id: "vol-1".into(),
                name: None,
                volume_type: volume_type.into(),
                size_gb,
                state,
                created_at: epoch(),
                attached_instance: (state == VolumeState::InUse).then(|| "i-1".to_string()),
                iops: None,
                tags: BTreeMap::new(),
            },
            age_days: 90,
            read_ops: None,
            write_ops: None,
        }
    }

    fn old_snapshot(age_days: i64, size_gb: u32) -> ResourceSnapshot {
        ResourceSnapshot::Snapshot(BackupSnapshot {
            record: SnapshotRecord {
                id: "snap-1".into(),
                volume_id: None,
                size_gb,
                started_at: epoch(),
                description: None,
                backs_image: false,
                tags: BTreeMap::new(),
            },
            age_days,
        })
    }

    #[test]
    fn spend_bands_are_strict() {
        let bands = SeverityBands::default();
        assert_eq!(spend_severity(Money::from_cents(10_001), &bands), Severity::Critical);
        assert_eq!(spend_severity(Money::from_cents(10_000), &bands), Severity::High);
        assert_eq!(spend_severity(Money::from_cents(5_000), &bands), Severity::Medium);
        assert_eq!(spend_severity(Money::from_cents(1_000), &bands), Severity::Low);
    }

    #[test]
    fn idle_instance_at_three_percent() {
        let out = engine().classify(ScanId::new(), "us-east-1", &instance("t3.medium", Some(flat(3.0))));
        let idle: Vec<&Finding> = out
            .findings
            .iter()
            .filter(|f| f.kind() == FindingKind::Ec2(Ec2Kind::IdleInstance))
            .collect();
        assert_eq!(idle.len(), 1);

        let finding = idle[0];
        // $30.37/mo is a medium spend, 3% average is a high depth
        assert_eq!(finding.severity(), Severity::High);
        assert_eq!(finding.monthly_savings().cents(), 3037);
        assert_eq!(finding.annual_savings().cents(), 3037 * 12);
    }

    #[test]
    fn unattached_gp3_volume() {
        let snapshot = ResourceSnapshot::Volume(volume("gp3", 100, VolumeState::Available));
        let out = engine().classify(ScanId::new(), "us-east-1", &snapshot);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].kind(), FindingKind::Ebs(EbsKind::UnattachedVolume));
        assert_eq!(out.findings[0].monthly_savings().cents(), 800);
        assert_eq!(out.findings[0].severity(), Severity::Low);
    }

    #[test]
    fn ancient_snapshot() {
        let out = engine().classify(ScanId::new(), "us-east-1", &old_snapshot(800, 50));
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].kind(), FindingKind::Ebs(EbsKind::AncientSnapshot));
        assert_eq!(out.findings[0].monthly_savings().cents(), 250);
    }

    #[test]
    fn snapshot_at_retention_limit_is_kept() {
        let out = engine().classify(ScanId::new(), "us-east-1", &old_snapshot(365, 50));
        assert!(out.findings.is_empty());
    }

    #[test]
    fn average_exactly_at_threshold_is_not_idle() {
        let out = engine().classify(ScanId::new(), "us-east-1", &instance("t3.medium", Some(flat(10.0))));
        assert!(out
            .findings
            .iter()
            .all(|f| f.kind() != FindingKind::Ec2(Ec2Kind::IdleInstance)));
    }

    #[test]
    fn fully_used_instance_has_no_findings() {
        let out = engine().classify(ScanId::new(), "us-east-1", &instance("m5.xlarge", Some(flat(100.0))));
        assert!(out.findings.is_empty());
        assert!(out.pricing_gaps.is_empty());
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let engine = engine();
        let scan_id = ScanId::new();
        let snapshot = instance("m5.xlarge", Some(series(HOUR, |i| 8.0 + (i % 24) as f64)));
        let first = engine.classify(scan_id, "eu-west-2", &snapshot);
        let second = engine.classify(scan_id, "eu-west-2", &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn missing_price_is_a_gap_not_a_finding() {
        let out = engine().classify(ScanId::new(), "us-east-1", &instance("x9.medium", Some(flat(1.0))));
        assert!(out.findings.is_empty());
        assert_eq!(out.pricing_gaps.len(), 1);
        assert!(out.pricing_gaps[0].contains("x9.medium"));
    }

    #[test]
    fn classify_all_merges() {
        let snapshots = vec![
            instance("t3.medium", Some(flat(3.0))),
            ResourceSnapshot::Volume(volume("gp3", 100, VolumeState::Available)),
            old_snapshot(800, 50),
        ];
        let out = engine().classify_all(ScanId::new(), "us-east-1", &snapshots);
        // idle and oversized for the instance, one each for volume and snapshot
        assert_eq!(out.findings.len(), 4);
        let total: Money = out.findings.iter().map(|f| f.monthly_savings()).sum();
        assert_eq!(total.cents(), 3037 + 1519 + 800 + 250);
    }
}
