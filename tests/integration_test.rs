use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cloudsift::config::{Config, FailurePolicy};
use cloudsift::error::ScanError;
use cloudsift::model::{
    EbsKind, Ec2Kind, FamilyStatus, FindingKind, ResourceFamily, ScanRun, ScanStatus, ScanTarget, Severity,
};
use cloudsift::pricing::PricingTable;
use cloudsift::scan::Scanner;
use cloudsift::source::fixture::{demo, Failure, FixtureDoc, FixtureSource, Pattern};
use cloudsift::source::retry::RetryPolicy;
use cloudsift::source::{
    InstanceRecord, InstanceState, InventoryKind, Metric, ResourceRecord, SnapshotRecord, Sources, VolumeRecord,
    VolumeState,
};
use cloudsift::store::diff::{compare_findings, DiffSide, DiffType};
use cloudsift::store::{MemoryStore, ScanStore, SqliteStore};

fn config() -> Config {
    let mut config = Config::default();
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    config
}

fn scanner_for(doc: FixtureDoc, page_size: usize, config: &Config, store: Arc<dyn ScanStore>) -> Scanner {
    let source = FixtureSource::new(doc).with_page_size(page_size);
    Scanner::new(config, PricingTable::builtin(), Sources::shared(Arc::new(source)), store)
}

fn scanner(doc: FixtureDoc) -> Scanner {
    scanner_for(doc, 50, &config(), Arc::new(MemoryStore::new()))
}

fn target() -> ScanTarget {
    ScanTarget::new("us-east-1").with_account("123456789012")
}

fn days_ago(n: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(n)
}

fn running_instance(id: &str, instance_type: &str) -> ResourceRecord {
    ResourceRecord::Instance(InstanceRecord {
        id: id.into(),
        name: None,
        instance_type: instance_type.into(),
        state: InstanceState::Running,
        launched_at: days_ago(120),
        tags: BTreeMap::new(),
    })
}

fn detached_volume(id: &str, volume_type: &str, size_gb: u32) -> ResourceRecord {
    ResourceRecord::Volume(VolumeRecord {
        id: id.into(),
        name: None,
        volume_type: volume_type.into(),
        size_gb,
        state: VolumeState::Available,
        created_at: days_ago(30),
        attached_instance: None,
        iops: None,
        tags: BTreeMap::new(),
    })
}

fn snapshot(id: &str, age_days: i64, size_gb: u32) -> ResourceRecord {
    ResourceRecord::Snapshot(SnapshotRecord {
        id: id.into(),
        volume_id: None,
        size_gb,
        started_at: days_ago(age_days),
        description: None,
        backs_image: false,
        tags: BTreeMap::new(),
    })
}

fn family_status(run: &ScanRun, family: ResourceFamily) -> &FamilyStatus {
    &run
        .manifest()
        .iter()
        .find(|outcome| outcome.family == family)
        .expect("family in manifest")
        .status
}

async fn wait_until_terminal(scanner: &Scanner, run: &ScanRun) -> ScanRun {
    let id = run.id();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = scanner.scan_status(id).await.unwrap();
            if status.status.is_terminal() {
                return scanner.get_scan(id).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scan reaches a terminal state")
}

#[tokio::test]
async fn idle_instance_at_three_percent_cpu() {
    let mut doc = FixtureDoc::default();
    doc.push(running_instance("i-idle", "t3.medium"));
    doc.metric("i-idle", Metric::CpuUtilization, Pattern::Flat { value: 3.0 });

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    assert_eq!(run.status(), ScanStatus::Completed);

    let findings = scanner.findings(run.id()).await.unwrap();
    let idle: Vec<_> = findings
        .iter()
        .filter(|f| f.kind() == FindingKind::Ec2(Ec2Kind::IdleInstance))
        .collect();
    assert_eq!(idle.len(), 1);
    let finding = idle[0];
    assert!(matches!(finding.severity(), Severity::High | Severity::Critical));
    assert_eq!(finding.monthly_savings().cents(), 3037);
    assert_eq!(finding.annual_savings().cents(), 3037 * 12);

    // the same instance also fits a t3.small, reported on its own
    let kinds: Vec<_> = findings.iter().map(|f| f.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            FindingKind::Ec2(Ec2Kind::IdleInstance),
            FindingKind::Ec2(Ec2Kind::OversizedInstance)
        ]
    );
    assert_eq!(run.summary().monthly_savings.cents(), 3037 + 1519);
}

#[tokio::test]
async fn unattached_gp3_volume_costs_eight_dollars() {
    let mut doc = FixtureDoc::default();
    doc.push(detached_volume("vol-detached", "gp3", 100));

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    let findings = scanner.findings(run.id()).await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind(), FindingKind::Ebs(EbsKind::UnattachedVolume));
    assert_eq!(findings[0].monthly_savings().cents(), 800);
}

#[tokio::test]
async fn old_snapshot_costs_two_fifty() {
    let mut doc = FixtureDoc::default();
    doc.push(snapshot("snap-old", 800, 50));
    doc.push(snapshot("snap-recent", 30, 50));

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    let findings = scanner.findings(run.id()).await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].resource_id(), "snap-old");
    assert_eq!(findings[0].kind(), FindingKind::Ebs(EbsKind::AncientSnapshot));
    assert_eq!(findings[0].monthly_savings().cents(), 250);
}

#[tokio::test]
async fn snapshot_sprawl_is_one_finding_per_volume() {
    let mut doc = FixtureDoc::default();
    for i in 0..35 {
        let ResourceRecord::Snapshot(mut record) = snapshot(&format!("snap-{i:03}"), i, 10) else {
            unreachable!();
        };
        record.volume_id = Some("vol-nightly".into());
        doc.push(ResourceRecord::Snapshot(record));
    }

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    let findings = scanner.findings(run.id()).await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind(), FindingKind::Ebs(EbsKind::ExcessiveSnapshots));
    assert_eq!(findings[0].resource_id(), "vol-nightly");
    // the five oldest, 50 GB at $0.05
    assert_eq!(findings[0].monthly_savings().cents(), 250);
    assert_eq!(run.resources_scanned(), 35);
}

#[tokio::test]
async fn throttled_metrics_recover_within_the_scan() {
    let mut doc = demo(Utc::now());
    doc.fail_metrics.insert(Metric::CpuUtilization, Failure::ThrottledTimes { times: 1 });

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();

    assert_eq!(run.status(), ScanStatus::Completed);
    assert!(run.failed_families().is_empty());
    let findings = scanner.findings(run.id()).await.unwrap();
    assert!(findings
        .iter()
        .any(|f| f.kind() == FindingKind::Ec2(Ec2Kind::IdleInstance)));
}

#[tokio::test]
async fn unauthorized_family_degrades_the_scan() {
    let mut doc = demo(Utc::now());
    doc.fail.insert(InventoryKind::Databases, Failure::Unauthorized);

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();

    assert_eq!(run.status(), ScanStatus::Completed);
    assert_eq!(run.failed_families(), vec![ResourceFamily::Rds]);
    assert!(matches!(
        family_status(&run, ResourceFamily::Rds),
        FamilyStatus::Failed { error } if error.contains("not authorized")
    ));

    let findings = scanner.findings(run.id()).await.unwrap();
    assert!(findings.iter().any(|f| f.family() == ResourceFamily::Ec2));
    assert!(findings.iter().any(|f| f.family() == ResourceFamily::Ebs));
    assert!(findings.iter().all(|f| f.family() != ResourceFamily::Rds));
}

#[tokio::test]
async fn second_scan_for_the_same_target_is_rejected() {
    let mut doc = demo(Utc::now());
    doc.fail.insert(InventoryKind::Databases, Failure::Stall { millis: 200 });
    let scanner = scanner(doc);

    let first = scanner.start_scan(target()).unwrap();
    match scanner.start_scan(target()) {
        Err(ScanError::AlreadyRunning { scan_id }) => assert_eq!(scan_id, first),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(scanner.in_flight(&target()), Some(first));

    // a different region is a different key
    let elsewhere = scanner.start_scan(ScanTarget::new("eu-west-2")).unwrap();
    assert_ne!(elsewhere, first);

    let run = wait_until_terminal(&scanner, &scanner.get_scan(first).await.unwrap()).await;
    assert!(run.status().is_terminal());
    wait_until_terminal(&scanner, &scanner.get_scan(elsewhere).await.unwrap()).await;

    assert!(scanner.in_flight(&target()).is_none());
    let again = scanner.start_scan(target()).unwrap();
    assert_ne!(again, first);
}

#[tokio::test]
async fn average_exactly_at_threshold_is_not_idle() {
    let mut doc = FixtureDoc::default();
    doc.push(running_instance("i-edge", "t3.medium"));
    doc.metric("i-edge", Metric::CpuUtilization, Pattern::Flat { value: 10.0 });

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    let findings = scanner.findings(run.id()).await.unwrap();
    assert!(findings
        .iter()
        .all(|f| f.kind() != FindingKind::Ec2(Ec2Kind::IdleInstance)));
}

#[tokio::test]
async fn fully_utilized_fleet_has_no_findings() {
    let mut doc = FixtureDoc::default();
    doc.push(running_instance("i-busy", "m5.xlarge"));
    doc.metric("i-busy", Metric::CpuUtilization, Pattern::Flat { value: 100.0 });

    let scanner = scanner(doc);
    let run = scanner.run_scan(target()).await.unwrap();
    assert_eq!(run.status(), ScanStatus::Completed);
    assert_eq!(run.summary().total_findings, 0);
    assert_eq!(run.resources_scanned(), 1);
}

#[tokio::test]
async fn every_page_is_collected() {
    let mut doc = FixtureDoc::default();
    for i in 0..25 {
        doc.push(detached_volume(&format!("vol-{i:03}"), "gp3", 10));
    }
    let source = Arc::new(FixtureSource::new(doc).with_page_size(3));
    let scanner = Scanner::new(
        &config(),
        PricingTable::builtin(),
        Sources::shared(source.clone()),
        Arc::new(MemoryStore::new()),
    );

    let run = scanner.run_scan(target()).await.unwrap();
    assert_eq!(run.summary().total_findings, 25);
    assert_eq!(run.summary().monthly_savings.cents(), 25 * 80);
    // 9 volume pages plus one page each for instances, snapshots and databases
    assert_eq!(source.inventory_calls(), 12);
}

#[tokio::test]
async fn family_over_budget_fails_alone() {
    let mut doc = demo(Utc::now());
    doc.fail.insert(InventoryKind::Databases, Failure::Stall { millis: 5_000 });
    let mut config = config();
    config.scan.budget = Duration::from_millis(300);

    let scanner = scanner_for(doc, 50, &config, Arc::new(MemoryStore::new()));
    let started = std::time::Instant::now();
    let run = scanner.run_scan(target()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(run.status(), ScanStatus::Completed);
    assert!(matches!(
        family_status(&run, ResourceFamily::Rds),
        FamilyStatus::Failed { error } if error.contains("budget")
    ));
    assert_eq!(run.succeeded_families(), vec![ResourceFamily::Ec2, ResourceFamily::Ebs]);
}

#[tokio::test]
async fn fail_fast_policy_fails_on_first_family_error() {
    let mut doc = demo(Utc::now());
    doc.fail.insert(InventoryKind::Instances, Failure::Unauthorized);
    let mut config = config();
    config.scan.failure_policy = FailurePolicy::FailFast;

    let scanner = scanner_for(doc, 50, &config, Arc::new(MemoryStore::new()));
    let run = scanner.run_scan(target()).await.unwrap();

    assert_eq!(run.status(), ScanStatus::Failed);
    assert_eq!(run.summary().total_findings, 0);
    assert!(scanner.findings(run.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn rescans_are_new_runs_in_sqlite_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scans.db");
    let store: Arc<dyn ScanStore> = Arc::new(SqliteStore::open(Some(&path)).unwrap());

    let first_scanner = scanner_for(demo(Utc::now()), 2, &config(), store.clone());
    let first = first_scanner.run_scan(target()).await.unwrap();

    // the old backup volume gets cleaned up between scans
    let mut doc = demo(Utc::now());
    doc.resources.retain(|r| r.id() != "vol-0b1c2d3e4f5a60001");
    let second_scanner = scanner_for(doc, 2, &config(), store.clone());
    let second = second_scanner.run_scan(target()).await.unwrap();
    assert_ne!(first.id(), second.id());

    let reopened = SqliteStore::open(Some(&path)).unwrap();
    let history = reopened.list_scans(Some("us-east-1")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id(), second.id());

    for run in &history {
        let findings = reopened.get_findings(run.id()).unwrap();
        let total: i64 = findings.iter().map(|f| f.monthly_savings().cents()).sum();
        assert_eq!(total, run.summary().monthly_savings.cents());
        assert!(findings.iter().all(|f| f.monthly_savings().cents() > 0));
    }

    let before = reopened.get_findings(first.id()).unwrap();
    let after = reopened.get_findings(second.id()).unwrap();
    let diff = compare_findings(
        DiffSide {
            id: first.id(),
            time: first.created_at(),
            findings: &before,
        },
        DiffSide {
            id: second.id(),
            time: second.created_at(),
            findings: &after,
        },
    );
    assert_eq!(diff.entries.len(), 1);
    assert_eq!(diff.entries[0].diff_type, DiffType::Resolved);
    assert_eq!(diff.entries[0].resource_id, "vol-0b1c2d3e4f5a60001");
    assert!(diff.net_change.cents() < 0);
}
