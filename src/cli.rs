use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cloudsift")]
#[command(about = "A read-only cloud waste auditor")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan one account/region and record the findings
    Scan(ScanArgs),

    /// Display the most recent scan or a specific one
    Report(ReportArgs),

    /// Compare the findings of two scans
    Diff(DiffArgs),
}

#[derive(Args)]
#[command(group(clap::ArgGroup::new("inventory_source").required(true).args(["inventory", "demo"])))]
pub struct ScanArgs {
    /// Region to scan
    #[arg(long)]
    pub region: String,

    /// Account the region belongs to
    #[arg(long)]
    pub account: Option<String>,

    /// JSON inventory and metrics file to scan
    #[arg(long)]
    pub inventory: Option<PathBuf>,

    /// Scan the built-in demo fleet
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    /// Output as JSON instead of table
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Wall-clock budget for the whole scan, e.g. "90s" or "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub budget: Option<Duration>,

    /// Fail the scan on the first family that fails
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct ReportArgs {
    /// Show a specific scan by ID
    #[arg(long)]
    pub id: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// List stored scans instead of showing one
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Only scans of this region
    #[arg(long)]
    pub region: Option<String>,
}

#[derive(Args)]
pub struct DiffArgs {
    /// Starting scan ID for comparison
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Ending scan ID for comparison
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Only consider scans of this region when picking the latest two
    #[arg(long)]
    pub region: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_needs_an_inventory_source() {
        assert!(Cli::try_parse_from(["cloudsift", "scan", "--region", "us-east-1"]).is_err());
        assert!(Cli::try_parse_from(["cloudsift", "scan", "--region", "us-east-1", "--demo", "--inventory", "f.json"])
            .is_err());
    }

    #[test]
    fn scan_flags_parse() {
        let cli = Cli::try_parse_from([
            "cloudsift", "-v", "scan", "--region", "eu-west-2", "--demo", "--budget", "90s", "--fail-fast",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.budget, Some(Duration::from_secs(90)));
        assert!(args.fail_fast);
        assert!(args.demo);
    }

    #[test]
    fn diff_ids_come_in_pairs() {
        assert!(Cli::try_parse_from(["cloudsift", "diff", "--from", "a"]).is_err());
        assert!(Cli::try_parse_from(["cloudsift", "diff", "--from", "a", "--to", "b"]).is_ok());
    }
}
