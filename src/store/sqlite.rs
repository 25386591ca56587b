use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{check_writable, ScanStore};
use crate::error::StoreError;
use crate::model::{
    Evidence, FamilyOutcome, Finding, FindingKind, Money, ScanId, ScanRun, ScanStatus, ScanSummary, ScanTarget,
    Severity, SeverityCounts,
};

/// Default database path (~/.local/share/cloudsift/cloudsift.db or platform equivalent)
pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let data_dir = directories::ProjectDirs::from("", "", "cloudsift")
        .ok_or(StoreError::NoDataDir)?
        .data_dir()
        .to_path_buf();

    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join("cloudsift.db"))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scan_runs (
            id TEXT PRIMARY KEY,
            account TEXT,
            region TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            monthly_savings_cents INTEGER NOT NULL,
            annual_savings_cents INTEGER NOT NULL,
            critical_count INTEGER NOT NULL,
            high_count INTEGER NOT NULL,
            medium_count INTEGER NOT NULL,
            low_count INTEGER NOT NULL,
            total_findings INTEGER NOT NULL,
            resources_scanned INTEGER NOT NULL,
            duration_ms INTEGER,
            peak_memory_bytes INTEGER,
            pricing_version TEXT,
            manifest TEXT NOT NULL,
            error TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS findings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            resource_name TEXT,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            monthly_savings_cents INTEGER NOT NULL,
            evidence TEXT NOT NULL,
            recommendation TEXT NOT NULL,
            FOREIGN KEY(scan_id) REFERENCES scan_runs(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_scan_id ON findings(scan_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scan_runs_region ON scan_runs(region, created_at)",
        [],
    )?;

    Ok(())
}

const RUN_COLUMNS: &str = "id, account, region, status, created_at, started_at, completed_at,
    monthly_savings_cents, annual_savings_cents, critical_count, high_count, medium_count, low_count,
    total_findings, resources_scanned, duration_ms, peak_memory_bytes, pricing_version, manifest, error";

/// Database handle. Open once per process; the connection is serialized
/// behind a mutex so the store can be shared with blocking tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens `path`, or the default database when `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let db_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_db_path()?,
        };
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(SqliteStore { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl ScanStore for SqliteStore {
    fn save_scan(&self, run: &ScanRun, findings: &[Finding]) -> Result<(), StoreError> {
        check_writable(run, findings)?;
        let manifest = serde_json::to_string(run.manifest())?;
        let summary = run.summary();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO scan_runs ({RUN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            params![
                run.id().to_string(),
                run.target().account.as_deref(),
                run.region(),
                run.status().as_str(),
                millis(run.created_at()),
                run.started_at().map(millis),
                run.completed_at().map(millis),
                summary.monthly_savings.cents(),
                summary.annual_savings.cents(),
                clamp_i64(summary.counts.critical as u64),
                clamp_i64(summary.counts.high as u64),
                clamp_i64(summary.counts.medium as u64),
                clamp_i64(summary.counts.low as u64),
                clamp_i64(summary.total_findings as u64),
                clamp_i64(run.resources_scanned() as u64),
                run.duration_ms().map(clamp_i64),
                run.peak_memory_bytes().map(clamp_i64),
                run.pricing_version(),
                manifest,
                run.error(),
            ],
        )?;

        let mut stmt = tx.prepare_cached(
            "INSERT INTO findings (scan_id, resource_id, resource_name, kind, severity, monthly_savings_cents, evidence, recommendation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for finding in findings {
            stmt.execute(params![
                finding.scan_id().to_string(),
                finding.resource_id(),
                finding.resource_name(),
                finding.kind().as_str(),
                finding.severity().as_str(),
                finding.monthly_savings().cents(),
                serde_json::to_string(finding.evidence())?,
                finding.recommendation(),
            ])?;
        }

        drop(stmt);
        tx.commit()?;

        Ok(())
    }

    fn get_scan(&self, id: ScanId) -> Result<Option<ScanRun>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM scan_runs WHERE id = ?1"))?;
        let row = stmt.query_row(params![id.to_string()], RunRow::from_row).optional()?;
        row.map(RunRow::into_run).transpose()
    }

    fn list_scans(&self, region: Option<&str>) -> Result<Vec<ScanRun>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS}
             FROM scan_runs
             WHERE ?1 IS NULL OR region = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;

        let rows = stmt
            .query_map(params![region], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RunRow::into_run).collect()
    }

    fn get_findings(&self, id: ScanId) -> Result<Vec<Finding>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT resource_id, resource_name, kind, severity, monthly_savings_cents, evidence, recommendation
             FROM findings
             WHERE scan_id = ?1
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok(FindingRow {
                    resource_id: row.get(0)?,
                    resource_name: row.get(1)?,
                    kind: row.get(2)?,
                    severity: row.get(3)?,
                    monthly_savings_cents: row.get(4)?,
                    evidence: row.get(5)?,
                    recommendation: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|row| row.into_finding(id)).collect()
    }

    fn delete_scan(&self, id: ScanId) -> Result<bool, StoreError> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM scan_runs WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }
}

/// Raw column values, validated into domain types outside the row callback.
struct RunRow {
    id: String,
    account: Option<String>,
    region: String,
    status: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    monthly_savings_cents: i64,
    annual_savings_cents: i64,
    counts: [i64; 4],
    total_findings: i64,
    resources_scanned: i64,
    duration_ms: Option<i64>,
    peak_memory_bytes: Option<i64>,
    pricing_version: Option<String>,
    manifest: String,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(RunRow {
            id: row.get(0)?,
            account: row.get(1)?,
            region: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            monthly_savings_cents: row.get(7)?,
            annual_savings_cents: row.get(8)?,
            counts: [row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?],
            total_findings: row.get(13)?,
            resources_scanned: row.get(14)?,
            duration_ms: row.get(15)?,
            peak_memory_bytes: row.get(16)?,
            pricing_version: row.get(17)?,
            manifest: row.get(18)?,
            error: row.get(19)?,
        })
    }

    fn into_run(self) -> Result<ScanRun, StoreError> {
        let id: ScanId = self
            .id
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("scan id '{}'", self.id)))?;
        let status = ScanStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("scan {id} status '{}'", self.status)))?;
        let manifest: Vec<FamilyOutcome> = serde_json::from_str(&self.manifest)?;
        let count = |n: i64| n.max(0) as usize;
        let [critical, high, medium, low] = self.counts;

        Ok(ScanRun {
            id,
            target: ScanTarget {
                account: self.account,
                region: self.region,
            },
            status,
            created_at: timestamp(self.created_at)?,
            started_at: self.started_at.map(timestamp).transpose()?,
            completed_at: self.completed_at.map(timestamp).transpose()?,
            summary: ScanSummary {
                monthly_savings: Money::from_cents(self.monthly_savings_cents),
                annual_savings: Money::from_cents(self.annual_savings_cents),
                counts: SeverityCounts {
                    critical: count(critical),
                    high: count(high),
                    medium: count(medium),
                    low: count(low),
                },
                total_findings: count(self.total_findings),
            },
            manifest,
            resources_scanned: count(self.resources_scanned),
            duration_ms: self.duration_ms.map(|ms| ms.max(0) as u64),
            peak_memory_bytes: self.peak_memory_bytes.map(|b| b.max(0) as u64),
            pricing_version: self.pricing_version,
            error: self.error,
        })
    }
}

struct FindingRow {
    resource_id: String,
    resource_name: Option<String>,
    kind: String,
    severity: String,
    monthly_savings_cents: i64,
    evidence: String,
    recommendation: String,
}

impl FindingRow {
    fn into_finding(self, scan_id: ScanId) -> Result<Finding, StoreError> {
        let kind = FindingKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("finding kind '{}'", self.kind)))?;
        let severity = Severity::parse(&self.severity)
            .ok_or_else(|| StoreError::Corrupt(format!("severity '{}'", self.severity)))?;
        let evidence: Evidence = serde_json::from_str(&self.evidence)?;

        Ok(Finding {
            scan_id,
            resource_id: self.resource_id,
            resource_name: self.resource_name,
            kind,
            severity,
            monthly_savings: Money::from_cents(self.monthly_savings_cents),
            evidence,
            recommendation: self.recommendation,
        })
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms}")))
}
