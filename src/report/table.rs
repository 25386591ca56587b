//! Terminal table rendering for scan results.
//!
//! Formats output as a per-family terminal table:
//! - Groups findings by resource family
//! - Shows per-family subtotals and the scan's monthly and annual totals
//! - Families with the most savings first, findings by savings within a family

use std::collections::HashMap;

use crate::model::{Evidence, Finding, Money, ResourceFamily, SavingsScenarios, ScanRun, ScanStatus};

pub fn render(run: &ScanRun, findings: &[Finding]) -> String {
    if findings.is_empty() {
        return match run.status() {
            ScanStatus::Completed if run.failed_families().is_empty() => String::from("No waste detected.\n"),
            ScanStatus::Completed => String::from("No waste detected in the families that could be scanned.\n"),
            _ => format!("Scan {}: no findings recorded.\n", run.status()),
        };
    }

    let mut output = String::new();

    let mut by_family: HashMap<ResourceFamily, Vec<&Finding>> = HashMap::new();
    for finding in findings {
        by_family.entry(finding.family()).or_default().push(finding);
    }

    let family_total = |family: &ResourceFamily| -> Money { by_family[family].iter().map(|f| f.monthly_savings()).sum() };
    let mut families: Vec<ResourceFamily> = by_family.keys().copied().collect();
    families.sort_by_key(|family| (std::cmp::Reverse(family_total(family)), *family));

    for family in families {
        let entries = &by_family[&family];

        output.push_str(&format!("\n{}\n", family.as_str().to_uppercase()));
        output.push_str(&"-".repeat(78));
        output.push('\n');

        let mut sorted: Vec<&&Finding> = entries.iter().collect();
        sorted.sort_by_key(|f| std::cmp::Reverse(f.monthly_savings()));

        for finding in sorted {
            let label = finding.resource_name().unwrap_or(finding.resource_id());
            output.push_str(&format!(
                "  {:<8} {:<26} {:<26} {:>12}\n",
                finding.severity().as_str(),
                truncate(label, 26),
                truncate(finding.kind().as_str(), 26),
                format!("{}/mo", finding.monthly_savings())
            ));
            output.push_str(&format!("           {}\n", finding.recommendation()));
            if let Evidence::Utilization(evidence) = finding.evidence() {
                if let Some(scenarios) = &evidence.scenarios {
                    output.push_str(&format!("           {}\n", alternatives(scenarios)));
                }
            }
        }

        output.push_str(&format!("  {:<62} {:>12}\n", "subtotal", format!("{}/mo", family_total(&family))));
    }

    let summary = run.summary();
    output.push_str(&format!(
        "\n{:>78}\n{:>78}\n",
        format!("TOTAL: {}/mo", summary.monthly_savings),
        format!("{}/yr", summary.annual_savings)
    ));

    output
}

fn alternatives(scenarios: &SavingsScenarios) -> String {
    let mut line = format!("or: schedule saves {}/mo", scenarios.schedule);
    if let Some(downsize) = &scenarios.downsize {
        line.push_str(&format!(", {} saves {}/mo", downsize.tier, downsize.savings));
    }
    line.push_str(&format!(", terminate saves {}/mo", scenarios.terminate));
    line
}

/// One line per stored scan, newest first.
pub fn render_history(runs: &[ScanRun]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{:<38} {:<20} {:<14} {:<10} {:>9} {:>14}\n",
        "ID", "Date", "Region", "Status", "Findings", "Savings/mo"
    ));
    output.push_str(&"-".repeat(110));
    output.push('\n');

    for run in runs {
        output.push_str(&format!(
            "{:<38} {:<20} {:<14} {:<10} {:>9} {:>14}\n",
            run.id().to_string(),
            run.created_at().format("%Y-%m-%d %H:%M:%S").to_string(),
            truncate(&run.target().to_string(), 14),
            run.status().as_str(),
            run.summary().total_findings,
            run.summary().monthly_savings.to_string()
        ));
    }
    output
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}
