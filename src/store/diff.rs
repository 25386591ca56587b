//! Scan comparison engine.
//!
//! Compares the findings of two scans and reports changes:
//! - Matches findings by resource id and finding kind
//! - Reports new, resolved, grew and shrank savings
//! - Net change in monthly savings

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{Finding, FindingKind, Money, ScanId, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Grew,
    Shrank,
    New,
    Resolved,
}

#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub resource_id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub old_savings: Money,
    pub new_savings: Money,
    pub delta: Money,
    pub diff_type: DiffType,
}

pub struct DiffResult {
    pub entries: Vec<DiffEntry>,
    pub net_change: Money,
    pub from_id: ScanId,
    pub to_id: ScanId,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
}

/// Side of a comparison: the scan's identity plus its findings.
pub struct DiffSide<'a> {
    pub id: ScanId,
    pub time: DateTime<Utc>,
    pub findings: &'a [Finding],
}

fn index(findings: &[Finding]) -> BTreeMap<(&str, &'static str), &Finding> {
    findings
        .iter()
        .map(|f| ((f.resource_id(), f.kind().as_str()), f))
        .collect()
}

fn signed(from: Money, to: Money) -> Money {
    Money::from_cents(to.cents().saturating_sub(from.cents()))
}

/// Compare two sets of findings and produce diff entries, ordered by
/// resource id then kind.
pub fn compare_findings(from: DiffSide<'_>, to: DiffSide<'_>) -> DiffResult {
    let from_map = index(from.findings);
    let to_map = index(to.findings);

    let mut entries = Vec::new();
    let mut net_change = 0i64;

    for (key, to_finding) in &to_map {
        let entry = match from_map.get(key) {
            Some(from_finding) => {
                let delta = signed(from_finding.monthly_savings(), to_finding.monthly_savings());
                if delta.cents() == 0 {
                    continue;
                }
                DiffEntry {
                    resource_id: to_finding.resource_id().to_string(),
                    kind: to_finding.kind(),
                    severity: to_finding.severity(),
                    old_savings: from_finding.monthly_savings(),
                    new_savings: to_finding.monthly_savings(),
                    delta,
                    diff_type: if delta.cents() > 0 { DiffType::Grew } else { DiffType::Shrank },
                }
            }
            None => DiffEntry {
                resource_id: to_finding.resource_id().to_string(),
                kind: to_finding.kind(),
                severity: to_finding.severity(),
                old_savings: Money::ZERO,
                new_savings: to_finding.monthly_savings(),
                delta: to_finding.monthly_savings(),
                diff_type: DiffType::New,
            },
        };
        net_change = net_change.saturating_add(entry.delta.cents());
        entries.push(entry);
    }

    for (key, from_finding) in &from_map {
        if to_map.contains_key(key) {
            continue;
        }
        let delta = signed(from_finding.monthly_savings(), Money::ZERO);
        net_change = net_change.saturating_add(delta.cents());
        entries.push(DiffEntry {
            resource_id: from_finding.resource_id().to_string(),
            kind: from_finding.kind(),
            severity: from_finding.severity(),
            old_savings: from_finding.monthly_savings(),
            new_savings: Money::ZERO,
            delta,
            diff_type: DiffType::Resolved,
        });
    }

    entries.sort_by(|a, b| {
        a.resource_id
            .cmp(&b.resource_id)
            .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
    });

    DiffResult {
        entries,
        net_change: Money::from_cents(net_change),
        from_id: from.id,
        to_id: to.id,
        from_time: from.time,
        to_time: to.time,
    }
}
