//! Scan runs, findings and the evidence behind them.
//!
//! A `ScanRun` owns its findings' totals: they are recomputed from the
//! findings whenever the run completes and are never set directly. A
//! `Finding` is built by the decision engine and is immutable afterwards.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;

/// A currency amount in whole cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Rounds to the nearest cent, halves away from zero.
    pub fn from_dollars(amount: f64) -> Self {
        if !amount.is_finite() {
            return Money::ZERO;
        }
        Money((amount * 100.0).round() as i64)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn as_dollars(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn annual(self) -> Money {
        Money(self.0.saturating_mul(12))
    }

    /// Difference clamped at zero. Savings are never negative.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0).max(0))
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(Uuid);

impl ScanId {
    pub fn new() -> Self {
        ScanId(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ScanId)
    }
}

/// The unit of work: one account and region pair. Passed explicitly to
/// every collector so concurrent scans never share ambient context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub region: String,
}

impl ScanTarget {
    pub fn new(region: impl Into<String>) -> Self {
        ScanTarget {
            account: None,
            region: region.into(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account {
            Some(account) => write!(f, "{account}/{}", self.region),
            None => write!(f, "{}", self.region),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceFamily {
    Ec2,
    Ebs,
    Rds,
}

impl ResourceFamily {
    pub const ALL: [ResourceFamily; 3] = [ResourceFamily::Ec2, ResourceFamily::Ebs, ResourceFamily::Rds];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceFamily::Ec2 => "ec2",
            ResourceFamily::Ebs => "ebs",
            ResourceFamily::Rds => "rds",
        }
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ec2Kind {
    IdleInstance,
    OversizedInstance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EbsKind {
    UnattachedVolume,
    IdleVolume,
    WrongVolumeType,
    AncientSnapshot,
    ExcessiveSnapshots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RdsKind {
    IdleDatabase,
    OversizedDatabase,
    OverprovisionedStorage,
}

/// Closed set of finding kinds, grouped by resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", content = "kind", rename_all = "lowercase")]
pub enum FindingKind {
    Ec2(Ec2Kind),
    Ebs(EbsKind),
    Rds(RdsKind),
}

impl FindingKind {
    pub fn family(&self) -> ResourceFamily {
        match self {
            FindingKind::Ec2(_) => ResourceFamily::Ec2,
            FindingKind::Ebs(_) => ResourceFamily::Ebs,
            FindingKind::Rds(_) => ResourceFamily::Rds,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Ec2(Ec2Kind::IdleInstance) => "ec2/idle-instance",
            FindingKind::Ec2(Ec2Kind::OversizedInstance) => "ec2/oversized-instance",
            FindingKind::Ebs(EbsKind::UnattachedVolume) => "ebs/unattached-volume",
            FindingKind::Ebs(EbsKind::IdleVolume) => "ebs/idle-volume",
            FindingKind::Ebs(EbsKind::WrongVolumeType) => "ebs/wrong-volume-type",
            FindingKind::Ebs(EbsKind::AncientSnapshot) => "ebs/ancient-snapshot",
            FindingKind::Ebs(EbsKind::ExcessiveSnapshots) => "ebs/excessive-snapshots",
            FindingKind::Rds(RdsKind::IdleDatabase) => "rds/idle-database",
            FindingKind::Rds(RdsKind::OversizedDatabase) => "rds/oversized-database",
            FindingKind::Rds(RdsKind::OverprovisionedStorage) => "rds/overprovisioned-storage",
        }
    }

    pub fn parse(s: &str) -> Option<FindingKind> {
        let kind = match s {
            "ec2/idle-instance" => FindingKind::Ec2(Ec2Kind::IdleInstance),
            "ec2/oversized-instance" => FindingKind::Ec2(Ec2Kind::OversizedInstance),
            "ebs/unattached-volume" => FindingKind::Ebs(EbsKind::UnattachedVolume),
            "ebs/idle-volume" => FindingKind::Ebs(EbsKind::IdleVolume),
            "ebs/wrong-volume-type" => FindingKind::Ebs(EbsKind::WrongVolumeType),
            "ebs/ancient-snapshot" => FindingKind::Ebs(EbsKind::AncientSnapshot),
            "ebs/excessive-snapshots" => FindingKind::Ebs(EbsKind::ExcessiveSnapshots),
            "rds/idle-database" => FindingKind::Rds(RdsKind::IdleDatabase),
            "rds/oversized-database" => FindingKind::Rds(RdsKind::OversizedDatabase),
            "rds/overprovisioned-storage" => FindingKind::Rds(RdsKind::OverprovisionedStorage),
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationEvidence {
    pub metric: String,
    pub tier: String,
    pub average: f64,
    pub peak: f64,
    pub busiest_day: f64,
    pub datapoints: usize,
    pub window_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_connections: Option<f64>,
    pub monthly_cost: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios: Option<SavingsScenarios>,
}

/// Monthly savings of the alternatives to an idle instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsScenarios {
    /// Stopped outside business hours.
    pub schedule: Money,
    /// `None` when no smaller size is priced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downsize: Option<DownsizeScenario>,
    pub terminate: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsizeScenario {
    pub tier: String,
    pub savings: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightsizingEvidence {
    pub metric: String,
    pub current_tier: String,
    pub recommended_tier: String,
    pub average: f64,
    pub p95: f64,
    pub projected_p95: f64,
    pub current_cost: Money,
    pub recommended_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeEvidence {
    pub volume_type: String,
    pub size_gb: u32,
    pub attached: bool,
    pub age_days: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ops: Option<f64>,
    pub monthly_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTypeEvidence {
    pub current_type: String,
    pub recommended_type: String,
    pub size_gb: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_iops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_p95_iops: Option<f64>,
    pub current_cost: Money,
    pub recommended_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvidence {
    pub size_gb: u32,
    pub age_days: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub monthly_cost: Money,
}

/// Snapshot counts by age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeDistribution {
    pub up_to_30_days: usize,
    pub up_to_90_days: usize,
    pub up_to_180_days: usize,
    pub up_to_365_days: usize,
    pub up_to_2_years: usize,
    pub older: usize,
}

impl AgeDistribution {
    pub fn record(&mut self, age_days: i64) {
        let bucket = match age_days {
            ..=30 => &mut self.up_to_30_days,
            31..=90 => &mut self.up_to_90_days,
            91..=180 => &mut self.up_to_180_days,
            181..=365 => &mut self.up_to_365_days,
            366..=730 => &mut self.up_to_2_years,
            _ => &mut self.older,
        };
        *bucket += 1;
    }

    pub fn total(&self) -> usize {
        self.up_to_30_days
            + self.up_to_90_days
            + self.up_to_180_days
            + self.up_to_365_days
            + self.up_to_2_years
            + self.older
    }
}

impl FromIterator<i64> for AgeDistribution {
    fn from_iter<I: IntoIterator<Item = i64>>(ages: I) -> Self {
        let mut distribution = AgeDistribution::default();
        for age in ages {
            distribution.record(age);
        }
        distribution
    }
}

/// Every snapshot taken of one source volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEvidence {
    pub source_volume: String,
    pub snapshot_count: usize,
    /// Newest snapshots a lifecycle policy would keep.
    pub retained: usize,
    pub total_size_gb: u64,
    pub excess_size_gb: u64,
    pub oldest_age_days: i64,
    pub ages: AgeDistribution,
    pub monthly_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvidence {
    pub storage_type: String,
    pub allocated_gb: u32,
    pub used_gb: f64,
    pub recommended_gb: u32,
    pub current_cost: Money,
    pub recommended_cost: Money,
}

/// The metric values and state that justified a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    Utilization(UtilizationEvidence),
    Rightsizing(RightsizingEvidence),
    Volume(VolumeEvidence),
    VolumeType(VolumeTypeEvidence),
    Snapshot(SnapshotEvidence),
    SnapshotLineage(LineageEvidence),
    Storage(StorageEvidence),
}

/// One costed recommendation for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub(crate) scan_id: ScanId,
    pub(crate) resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) resource_name: Option<String>,
    pub(crate) kind: FindingKind,
    pub(crate) severity: Severity,
    pub(crate) monthly_savings: Money,
    pub(crate) evidence: Evidence,
    pub(crate) recommendation: String,
}

impl Finding {
    /// Returns `None` when there is nothing to save; zero-savings findings
    /// are never emitted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scan_id: ScanId,
        resource_id: &str,
        resource_name: Option<&str>,
        kind: FindingKind,
        severity: Severity,
        monthly_savings: Money,
        evidence: Evidence,
        recommendation: String,
    ) -> Option<Self> {
        if !monthly_savings.is_positive() {
            return None;
        }
        Some(Finding {
            scan_id,
            resource_id: resource_id.to_string(),
            resource_name: resource_name.map(str::to_string),
            kind,
            severity,
            monthly_savings,
            evidence,
            recommendation,
        })
    }

    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn resource_name(&self) -> Option<&str> {
        self.resource_name.as_deref()
    }

    pub fn kind(&self) -> FindingKind {
        self.kind
    }

    pub fn family(&self) -> ResourceFamily {
        self.kind.family()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn monthly_savings(&self) -> Money {
        self.monthly_savings
    }

    pub fn annual_savings(&self) -> Money {
        self.monthly_savings.annual()
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn recommendation(&self) -> &str {
        &self.recommendation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ScanStatus> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    fn can_transition_to(&self, next: ScanStatus) -> bool {
        matches!(
            (self, next),
            (ScanStatus::Pending, ScanStatus::Running)
                | (ScanStatus::Running, ScanStatus::Completed)
                | (ScanStatus::Running, ScanStatus::Failed)
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub monthly_savings: Money,
    pub annual_savings: Money,
    pub counts: SeverityCounts,
    pub total_findings: usize,
}

impl ScanSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = SeverityCounts::default();
        let mut monthly = Money::ZERO;
        for finding in findings {
            counts.record(finding.severity);
            monthly += finding.monthly_savings;
        }
        ScanSummary {
            monthly_savings: monthly,
            annual_savings: monthly.annual(),
            counts,
            total_findings: findings.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FamilyStatus {
    Succeeded {
        resources: usize,
        findings: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pricing_gaps: Vec<String>,
        #[serde(default)]
        skipped_rules: usize,
    },
    Failed {
        error: String,
    },
}

/// One line of a scan's manifest: whether a resource family could be
/// collected at all, so an empty result is never mistaken for "no waste".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyOutcome {
    pub family: ResourceFamily,
    #[serde(flatten)]
    pub status: FamilyStatus,
}

impl FamilyOutcome {
    pub fn failed(family: ResourceFamily, error: impl Into<String>) -> Self {
        FamilyOutcome {
            family,
            status: FamilyStatus::Failed { error: error.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FamilyStatus::Succeeded { .. })
    }
}

/// One invocation of the engine against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRun {
    pub(crate) id: ScanId,
    pub(crate) target: ScanTarget,
    pub(crate) status: ScanStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) summary: ScanSummary,
    pub(crate) manifest: Vec<FamilyOutcome>,
    pub(crate) resources_scanned: usize,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) peak_memory_bytes: Option<u64>,
    pub(crate) pricing_version: Option<String>,
    pub(crate) error: Option<String>,
}

impl ScanRun {
    pub fn new(target: ScanTarget) -> Self {
        ScanRun {
            id: ScanId::new(),
            target,
            status: ScanStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            summary: ScanSummary::default(),
            manifest: Vec::new(),
            resources_scanned: 0,
            duration_ms: None,
            peak_memory_bytes: None,
            pricing_version: None,
            error: None,
        }
    }

    fn transition(&mut self, next: ScanStatus) -> Result<(), ScanError> {
        if !self.status.can_transition_to(next) {
            return Err(ScanError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ScanError> {
        self.transition(ScanStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Totals are recomputed from `findings`; the manifest records which
    /// families contributed.
    pub fn complete(
        &mut self,
        findings: &[Finding],
        manifest: Vec<FamilyOutcome>,
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        self.transition(ScanStatus::Completed)?;
        self.summary = ScanSummary::from_findings(findings);
        self.resources_scanned = manifest
            .iter()
            .map(|outcome| match outcome.status {
                FamilyStatus::Succeeded { resources, .. } => resources,
                FamilyStatus::Failed { .. } => 0,
            })
            .sum();
        self.manifest = manifest;
        self.finish_clock(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error: impl Into<String>,
        manifest: Vec<FamilyOutcome>,
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        self.transition(ScanStatus::Failed)?;
        self.summary = ScanSummary::default();
        self.manifest = manifest;
        self.error = Some(error.into());
        self.finish_clock(now);
        Ok(())
    }

    fn finish_clock(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        let from = self.started_at.unwrap_or(self.created_at);
        self.duration_ms = u64::try_from((now - from).num_milliseconds()).ok();
    }

    pub(crate) fn record_runtime(&mut self, peak_memory_bytes: Option<u64>, pricing_version: &str) {
        self.peak_memory_bytes = peak_memory_bytes;
        self.pricing_version = Some(pricing_version.to_string());
    }

    pub fn id(&self) -> ScanId {
        self.id
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn region(&self) -> &str {
        &self.target.region
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    pub fn manifest(&self) -> &[FamilyOutcome] {
        &self.manifest
    }

    pub fn resources_scanned(&self) -> usize {
        self.resources_scanned
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn peak_memory_bytes(&self) -> Option<u64> {
        self.peak_memory_bytes
    }

    pub fn pricing_version(&self) -> Option<&str> {
        self.pricing_version.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed_families(&self) -> Vec<ResourceFamily> {
        self.manifest
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.family)
            .collect()
    }

    pub fn succeeded_families(&self) -> Vec<ResourceFamily> {
        self.manifest
            .iter()
            .filter(|outcome| outcome.is_success())
            .map(|outcome| outcome.family)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(cents: i64, severity: Severity) -> Finding {
        Finding::new(
            ScanId::new(),
            "vol-1",
            None,
            FindingKind::Ebs(EbsKind::UnattachedVolume),
            severity,
            Money::from_cents(cents),
            Evidence::Volume(VolumeEvidence {
                volume_type: "gp3".into(),
                size_gb: 10,
                attached: false,
                age_days: 3,
                attached_instance: None,
                total_ops: None,
                monthly_cost: Money::from_cents(cents),
            }),
            "delete".into(),
        )
        .expect("positive savings")
    }

    #[test]
    fn money_rounds_to_nearest_cent() {
        assert_eq!(Money::from_dollars(100.0 * 0.08).cents(), 800);
        assert_eq!(Money::from_dollars(0.0472 * 730.0).cents(), 3446);
        assert_eq!(Money::from_dollars(0.125).cents(), 13);
        assert_eq!(Money::from_dollars(f64::NAN), Money::ZERO);
    }

    #[test]
    fn money_display_and_clamp() {
        assert_eq!(Money::from_cents(123_456).to_string(), "$1234.56");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(100).saturating_sub(Money::from_cents(300)), Money::ZERO);
        assert_eq!(Money::from_cents(250).annual().cents(), 3000);
    }

    #[test]
    fn zero_savings_finding_is_not_built() {
        let evidence = Evidence::Snapshot(SnapshotEvidence {
            size_gb: 0,
            age_days: 900,
            source_volume: None,
            description: None,
            monthly_cost: Money::ZERO,
        });
        let built = Finding::new(
            ScanId::new(),
            "snap-1",
            None,
            FindingKind::Ebs(EbsKind::AncientSnapshot),
            Severity::Low,
            Money::ZERO,
            evidence,
            "delete".into(),
        );
        assert!(built.is_none());
    }

    #[test]
    fn finding_kind_string_round_trip() {
        for kind in [
            FindingKind::Ec2(Ec2Kind::IdleInstance),
            FindingKind::Ebs(EbsKind::AncientSnapshot),
            FindingKind::Rds(RdsKind::OverprovisionedStorage),
        ] {
            assert_eq!(FindingKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FindingKind::parse("ec2/unknown"), None);
    }

    #[test]
    fn snapshot_ages_fall_into_buckets() {
        let ages: AgeDistribution = [0, 30, 31, 365, 366, 730, 731, 2000].into_iter().collect();
        assert_eq!(ages.up_to_30_days, 2);
        assert_eq!(ages.up_to_90_days, 1);
        assert_eq!(ages.up_to_180_days, 0);
        assert_eq!(ages.up_to_365_days, 1);
        assert_eq!(ages.up_to_2_years, 2);
        assert_eq!(ages.older, 2);
        assert_eq!(ages.total(), 8);
    }

    #[test]
    fn lifecycle_rejects_illegal_transitions() {
        let mut run = ScanRun::new(ScanTarget::new("eu-west-2"));
        let now = Utc::now();
        assert!(run.complete(&[], vec![], now).is_err());
        run.start(now).unwrap();
        assert!(run.start(now).is_err());
        run.complete(&[], vec![], now).unwrap();
        assert!(run.fail("late", vec![], now).is_err());
        assert_eq!(run.status(), ScanStatus::Completed);
    }

    #[test]
    fn totals_are_recomputed_from_findings() {
        let mut run = ScanRun::new(ScanTarget::new("eu-west-2"));
        let now = Utc::now();
        run.start(now).unwrap();
        let findings = vec![
            finding(800, Severity::Low),
            finding(12_050, Severity::Critical),
            finding(250, Severity::Low),
        ];
        run.complete(&findings, vec![], now).unwrap();

        let summary = run.summary();
        assert_eq!(summary.monthly_savings.cents(), 13_100);
        assert_eq!(summary.annual_savings.cents(), 13_100 * 12);
        assert_eq!(summary.counts.low, 2);
        assert_eq!(summary.counts.critical, 1);
        assert_eq!(summary.total_findings, 3);
    }
}
