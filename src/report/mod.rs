pub mod json;
pub mod table;

use crate::model::{FamilyStatus, Finding, ScanRun};

pub fn print(run: &ScanRun, findings: &[Finding], as_json: bool, verbose: bool) -> Result<(), serde_json::Error> {
    if as_json {
        println!("{}", json::render(run, findings)?);
    } else {
        print!("{}", table::render(run, findings));
        print_scan_info(run, verbose);
        print_manifest(run, verbose);
    }
    Ok(())
}

fn print_scan_info(run: &ScanRun, verbose: bool) {
    println!("\nscan: {} ({}, {})", run.id(), run.target(), run.status());
    if let Some(error) = run.error() {
        println!("error: {error}");
    }
    if let Some(duration_ms) = run.duration_ms() {
        let duration_sec = duration_ms as f64 / 1000.0;
        println!("scanned {} resources in {duration_sec:.2}s", run.resources_scanned());
    }

    if verbose {
        if let Some(peak_bytes) = run.peak_memory_bytes() {
            println!("peak memory: {}", format_bytes(peak_bytes));
        }
        if let Some(version) = run.pricing_version() {
            println!("pricing: {version}");
        }
    }
}

/// Failed families are always shown so an empty table is never read as
/// "no waste". Pricing gaps only with `--verbose`.
fn print_manifest(run: &ScanRun, verbose: bool) {
    let manifest = run.manifest();
    if manifest.is_empty() {
        return;
    }

    println!();
    if verbose {
        println!("Families:");
        println!("{}", "-".repeat(40));
    }
    for outcome in manifest {
        match &outcome.status {
            FamilyStatus::Failed { error } => println!("[failed] {}: {error}", outcome.family),
            FamilyStatus::Succeeded {
                resources,
                findings,
                pricing_gaps,
                skipped_rules,
            } => {
                if verbose {
                    println!(
                        "  {}: {resources} resources, {findings} findings, {skipped_rules} rules skipped",
                        outcome.family
                    );
                    for gap in pricing_gaps {
                        println!("    [no price] {gap}");
                    }
                } else if !pricing_gaps.is_empty() {
                    println!("[diagnostic] {}: {} findings without a price", outcome.family, pricing_gaps.len());
                }
            }
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
