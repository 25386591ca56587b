use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use cloudsift::cli::{Cli, Command, DiffArgs, ReportArgs, ScanArgs};
use cloudsift::config::Config;
use cloudsift::model::{Money, ScanId, ScanRun, ScanStatus, ScanTarget};
use cloudsift::report;
use cloudsift::scan::Scanner;
use cloudsift::source::fixture::{demo, FixtureSource};
use cloudsift::source::Sources;
use cloudsift::store::diff::{self, DiffEntry, DiffResult, DiffSide, DiffType};
use cloudsift::store::{ScanStore, SqliteStore};

fn init_logging(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(config.store.path.as_deref()).context("failed to open scan database")
}

fn parse_id(raw: &str) -> Result<ScanId> {
    raw.parse()
        .with_context(|| format!("Invalid scan ID: '{raw}'. Must be a UUID."))
}

fn print_diff(result: &DiffResult) {
    let format_time = |t: chrono::DateTime<chrono::Utc>| t.format("%Y-%m-%d %H:%M:%S").to_string();

    println!("\nComparing scans:");
    println!("  From: {} ({})", result.from_id, format_time(result.from_time));
    println!("  To:   {} ({})", result.to_id, format_time(result.to_time));
    println!();

    if result.entries.is_empty() {
        println!("No changes detected.");
        return;
    }

    let of_type = |wanted: DiffType| -> Vec<&DiffEntry> {
        result.entries.iter().filter(|e| e.diff_type == wanted).collect()
    };
    let mut grew = of_type(DiffType::Grew);
    let mut shrank = of_type(DiffType::Shrank);
    let mut new = of_type(DiffType::New);
    let mut resolved = of_type(DiffType::Resolved);

    grew.sort_by_key(|e| std::cmp::Reverse(e.delta));
    shrank.sort_by_key(|e| e.delta);
    new.sort_by_key(|e| std::cmp::Reverse(e.delta));
    resolved.sort_by_key(|e| e.delta);

    for entry in grew {
        println!(
            "  [+] {} {} grew {} -> {}/mo",
            entry.resource_id, entry.kind, entry.old_savings, entry.new_savings
        );
    }

    for entry in shrank {
        println!(
            "  [-] {} {} shrank {} -> {}/mo",
            entry.resource_id, entry.kind, entry.old_savings, entry.new_savings
        );
    }

    for entry in new {
        println!(
            "  [new] {} {} ({}, {}/mo)",
            entry.resource_id, entry.kind, entry.severity, entry.new_savings
        );
    }

    for entry in resolved {
        println!(
            "  [resolved] {} {} (was {}/mo)",
            entry.resource_id, entry.kind, entry.old_savings
        );
    }

    println!();
    if result.net_change.cents() >= 0 {
        println!("Net change: +{}/mo of new waste", result.net_change);
    } else {
        println!("Net change: {}/mo eliminated", Money::from_cents(-result.net_change.cents()));
    }
}

/// A scan that ran but ended `failed` exits non-zero.
fn exit_code(run: &ScanRun) -> ExitCode {
    match run.status() {
        ScanStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

async fn scan(args: ScanArgs, mut config: Config, verbose: bool) -> Result<ExitCode> {
    config.apply_scan_args(&args);
    let pricing = config.pricing_table()?;

    let source = match &args.inventory {
        Some(path) => FixtureSource::from_path(path)
            .with_context(|| format!("failed to load inventory {}", path.display()))?,
        None => FixtureSource::new(demo(chrono::Utc::now())),
    };
    let store: Arc<dyn ScanStore> = Arc::new(open_store(&config)?);
    let scanner = Scanner::new(&config, pricing, Sources::shared(Arc::new(source)), store);

    let mut target = ScanTarget::new(args.region);
    if let Some(account) = args.account {
        target = target.with_account(account);
    }

    let run = scanner.run_scan(target).await?;
    let findings = match run.status() {
        ScanStatus::Completed => scanner.findings(run.id()).await?,
        _ => Vec::new(),
    };
    report::print(&run, &findings, args.json, verbose)?;
    Ok(exit_code(&run))
}

fn show_report(args: ReportArgs, config: &Config, verbose: bool) -> Result<()> {
    let store = open_store(config)?;

    if args.list {
        let runs = store.list_scans(args.region.as_deref())?;
        if args.json {
            println!("{}", report::json::render_history(&runs)?);
        } else if runs.is_empty() {
            println!("No scans found. Run 'cloudsift scan' to create one.");
        } else {
            print!("{}", report::table::render_history(&runs));
        }
        return Ok(());
    }

    let run = match &args.id {
        Some(raw) => {
            let id = parse_id(raw)?;
            store
                .get_scan(id)?
                .with_context(|| format!("Scan {id} not found"))?
        }
        None => match store.latest_scan(args.region.as_deref())? {
            Some(run) => run,
            None => bail!("No scans found. Run 'cloudsift scan' to create one."),
        },
    };
    let findings = store.get_findings(run.id())?;
    report::print(&run, &findings, args.json, verbose)?;
    Ok(())
}

fn load_run(store: &SqliteStore, raw: &str) -> Result<ScanRun> {
    let id = parse_id(raw)?;
    store
        .get_scan(id)?
        .with_context(|| format!("Scan {id} not found"))
}

fn show_diff(args: DiffArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;

    let (from, to) = match (&args.from, &args.to) {
        (Some(from), Some(to)) => (load_run(&store, from)?, load_run(&store, to)?),
        _ => {
            let mut runs: Vec<ScanRun> = store
                .list_scans(args.region.as_deref())?
                .into_iter()
                .filter(|run| run.status() == ScanStatus::Completed)
                .take(2)
                .collect();
            if runs.len() < 2 {
                bail!("Need at least 2 completed scans to compare. Run 'cloudsift scan' a few times.");
            }
            let newer = runs.remove(0);
            (runs.remove(0), newer)
        }
    };

    let from_findings = store.get_findings(from.id())?;
    let to_findings = store.get_findings(to.id())?;
    let result = diff::compare_findings(
        DiffSide {
            id: from.id(),
            time: from.created_at(),
            findings: &from_findings,
        },
        DiffSide {
            id: to.id(),
            time: to.created_at(),
            findings: &to_findings,
        },
    );
    print_diff(&result);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan(args) => scan(args, config, cli.verbose).await,
        Command::Report(args) => show_report(args, &config, cli.verbose).map(|()| ExitCode::SUCCESS),
        Command::Diff(args) => show_diff(args, &config).map(|()| ExitCode::SUCCESS),
    }
}
