use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::ScanArgs;
use crate::error::ConfigError;
use crate::pricing::PricingTable;
use crate::source::retry::RetryPolicy;

/// Tunable decision-engine thresholds. Every comparison against these is
/// strict: a value exactly at a threshold does not trigger the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Average (and every daily average) CPU below this is idle.
    pub idle_cpu_percent: f64,
    pub idle_critical_cpu_percent: f64,
    pub idle_high_cpu_percent: f64,
    /// Fraction of the metrics window that must have samples.
    pub min_window_coverage: f64,
    /// Projected p95 on the next smaller tier must stay below this.
    pub oversize_ceiling_percent: f64,
    pub idle_db_max_connections: f64,
    /// Read + write operations over the whole window.
    pub idle_volume_max_ops: f64,
    pub gp3_baseline_iops: f64,
    pub io_provisioned_iops_ceiling: u32,
    pub snapshot_retention_days: i64,
    /// More snapshots than this of one volume calls for a lifecycle policy.
    pub max_snapshots_per_volume: usize,
    /// Weekly hours an idle instance would run if put on a schedule.
    pub schedule_hours_per_week: f64,
    pub rds_min_allocated_gb: u32,
    pub rds_storage_utilization_threshold: f64,
    pub rds_storage_headroom: f64,
    pub bands: SeverityBands,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            idle_cpu_percent: 10.0,
            idle_critical_cpu_percent: 2.0,
            idle_high_cpu_percent: 5.0,
            min_window_coverage: 0.9,
            oversize_ceiling_percent: 60.0,
            idle_db_max_connections: 0.0,
            idle_volume_max_ops: 100.0,
            gp3_baseline_iops: 3000.0,
            io_provisioned_iops_ceiling: 10_000,
            snapshot_retention_days: 365,
            max_snapshots_per_volume: 30,
            schedule_hours_per_week: 50.0,
            rds_min_allocated_gb: 100,
            rds_storage_utilization_threshold: 0.25,
            rds_storage_headroom: 1.5,
            bands: SeverityBands::default(),
        }
    }
}

/// Monthly savings, in dollars, a finding must exceed to reach each band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        SeverityBands {
            critical: 100.0,
            high: 50.0,
            medium: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Complete with whatever families succeeded; fail only if none did.
    #[default]
    BestEffort,
    /// Abort the scan on the first family failure.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    #[serde(with = "human_duration")]
    pub window: Duration,
    #[serde(with = "human_duration")]
    pub granularity: Duration,
    #[serde(with = "human_duration")]
    pub io_granularity: Duration,
    /// Wall-clock budget for the whole scan.
    #[serde(with = "human_duration")]
    pub budget: Duration,
    pub failure_policy: FailurePolicy,
    pub metric_concurrency: usize,
    pub max_pages: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            window: Duration::from_secs(14 * 86_400),
            granularity: Duration::from_secs(3600),
            io_granularity: Duration::from_secs(86_400),
            budget: Duration::from_secs(300),
            failure_policy: FailurePolicy::BestEffort,
            metric_concurrency: 8,
            max_pages: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub scan: ScanSettings,
    pub retry: RetryPolicy,
    pub store: StoreSettings,
    pub pricing_file: Option<PathBuf>,
}

impl Config {
    /// `<config_dir>/cloudsift/config.toml` or platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cloudsift").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads `path` if given, else the default path if it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Config::from_path(path),
            None => match Config::default_path() {
                Some(path) if path.exists() => Config::from_path(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&source).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_scan_args(&mut self, args: &ScanArgs) {
        if let Some(budget) = args.budget {
            self.scan.budget = budget;
        }
        if args.fail_fast {
            self.scan.failure_policy = FailurePolicy::FailFast;
        }
    }

    pub fn pricing_table(&self) -> Result<PricingTable, ConfigError> {
        match &self.pricing_file {
            Some(path) => PricingTable::from_path(path),
            None => Ok(PricingTable::builtin()),
        }
    }
}

/// Serde adapter for human-readable durations ("14d", "5m", "1h").
pub(crate) mod human_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scan.window, Duration::from_secs(14 * 86_400));
        assert_eq!(config.thresholds.idle_cpu_percent, 10.0);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [thresholds]
            idle_cpu_percent = 5.0

            [thresholds.bands]
            critical = 500.0

            [scan]
            window = "7d"
            budget = "90s"
            failure_policy = "fail-fast"

            [retry]
            max_attempts = 2
            base_delay = "10ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.idle_cpu_percent, 5.0);
        assert_eq!(config.thresholds.oversize_ceiling_percent, 60.0);
        assert_eq!(config.thresholds.bands.critical, 500.0);
        assert_eq!(config.thresholds.bands.high, 50.0);
        assert_eq!(config.scan.window, Duration::from_secs(7 * 86_400));
        assert_eq!(config.scan.budget, Duration::from_secs(90));
        assert_eq!(config.scan.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.scan.granularity, Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        let parsed: Result<Config, _> = toml::from_str("[scan]\nwindow = \"fortnight\"\n");
        assert!(parsed.is_err());
    }
}
