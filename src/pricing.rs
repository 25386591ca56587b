//! Static, versioned price book.
//!
//! Instance and database classes are priced per hour, storage per GB-month.
//! Regional prices are the base list scaled by a per-region multiplier.
//! A tier missing from the book is a `PricingError`, never a zero price.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PricingError};
use crate::model::Money;

pub const HOURS_PER_MONTH: f64 = 730.0;
pub const HOURS_PER_WEEK: f64 = 168.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    /// EC2 instance type, hourly.
    Compute,
    /// RDS instance class, hourly.
    Database,
    /// EBS volume type, per GB-month.
    Volume,
    /// RDS storage type, per GB-month.
    DatabaseStorage,
    /// EBS snapshot storage tier, per GB-month.
    Snapshot,
}

impl PriceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceKind::Compute => "compute",
            PriceKind::Database => "database",
            PriceKind::Volume => "volume",
            PriceKind::DatabaseStorage => "database_storage",
            PriceKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for PriceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    version: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    compute: HashMap<String, f64>,
    #[serde(default)]
    database: HashMap<String, f64>,
    #[serde(default)]
    volume: HashMap<String, f64>,
    #[serde(default)]
    database_storage: HashMap<String, f64>,
    #[serde(default)]
    snapshot: HashMap<String, f64>,
    #[serde(default)]
    regions: HashMap<String, f64>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Snapshot storage tier used for standard EBS snapshots.
pub const STANDARD_SNAPSHOT_TIER: &str = "standard";

impl PricingTable {
    pub fn empty(version: impl Into<String>) -> Self {
        PricingTable {
            version: version.into(),
            currency: default_currency(),
            compute: HashMap::new(),
            database: HashMap::new(),
            volume: HashMap::new(),
            database_storage: HashMap::new(),
            snapshot: HashMap::new(),
            regions: HashMap::new(),
        }
    }

    /// On-demand list prices (Linux, us-east-1) with regional uplifts.
    pub fn builtin() -> Self {
        let mut table = PricingTable::empty("builtin-2024.1");
        let compute = [
            ("t3.nano", 0.0052),
            ("t3.micro", 0.0104),
            ("t3.small", 0.0208),
            ("t3.medium", 0.0416),
            ("t3.large", 0.0832),
            ("t3.xlarge", 0.1664),
            ("t3.2xlarge", 0.3328),
            ("t2.micro", 0.0116),
            ("t2.small", 0.023),
            ("t2.medium", 0.0464),
            ("t2.large", 0.0928),
            ("m5.large", 0.096),
            ("m5.xlarge", 0.192),
            ("m5.2xlarge", 0.384),
            ("m5.4xlarge", 0.768),
            ("c5.large", 0.085),
            ("c5.xlarge", 0.17),
            ("c5.2xlarge", 0.34),
            ("r5.large", 0.126),
            ("r5.xlarge", 0.252),
            ("r5.2xlarge", 0.504),
        ];
        let database = [
            ("db.t3.micro", 0.017),
            ("db.t3.small", 0.034),
            ("db.t3.medium", 0.068),
            ("db.t3.large", 0.136),
            ("db.m5.large", 0.171),
            ("db.m5.xlarge", 0.342),
            ("db.m5.2xlarge", 0.684),
            ("db.r5.large", 0.24),
            ("db.r5.xlarge", 0.48),
            ("db.r5.2xlarge", 0.96),
        ];
        let volume = [
            ("gp3", 0.08),
            ("gp2", 0.10),
            ("io1", 0.125),
            ("io2", 0.125),
            ("st1", 0.045),
            ("sc1", 0.015),
            ("standard", 0.05),
        ];
        let database_storage = [("gp2", 0.115), ("gp3", 0.115), ("io1", 0.125)];
        let snapshot = [(STANDARD_SNAPSHOT_TIER, 0.05), ("archive", 0.0125)];
        let regions = [
            ("us-east-1", 1.0),
            ("us-east-2", 1.0),
            ("us-west-2", 1.0),
            ("eu-west-1", 1.1),
            ("eu-west-2", 1.2),
            ("eu-central-1", 1.15),
            ("ap-southeast-2", 1.25),
        ];

        for (tier, price) in compute {
            table.set(PriceKind::Compute, tier, price);
        }
        for (tier, price) in database {
            table.set(PriceKind::Database, tier, price);
        }
        for (tier, price) in volume {
            table.set(PriceKind::Volume, tier, price);
        }
        for (tier, price) in database_storage {
            table.set(PriceKind::DatabaseStorage, tier, price);
        }
        for (tier, price) in snapshot {
            table.set(PriceKind::Snapshot, tier, price);
        }
        for (region, multiplier) in regions {
            table.regions.insert(region.to_string(), multiplier);
        }
        table
    }

    pub fn from_toml_str(source: &str) -> Result<Self, PricingError> {
        let table: PricingTable =
            toml::from_str(source).map_err(|e| PricingError::Invalid(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(PricingTable::from_toml_str(&source)?)
    }

    fn validate(&self) -> Result<(), PricingError> {
        let prices = [
            &self.compute,
            &self.database,
            &self.volume,
            &self.database_storage,
            &self.snapshot,
        ];
        for map in prices {
            if let Some((tier, price)) = map.iter().find(|(_, p)| !p.is_finite() || **p < 0.0) {
                return Err(PricingError::Invalid(format!("price for '{tier}' is {price}")));
            }
        }
        if let Some((region, m)) = self.regions.iter().find(|(_, m)| !m.is_finite() || **m <= 0.0) {
            return Err(PricingError::Invalid(format!("multiplier for '{region}' is {m}")));
        }
        Ok(())
    }

    pub fn set(&mut self, kind: PriceKind, tier: &str, price: f64) {
        self.prices_mut(kind).insert(tier.to_string(), price);
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    fn prices(&self, kind: PriceKind) -> &HashMap<String, f64> {
        match kind {
            PriceKind::Compute => &self.compute,
            PriceKind::Database => &self.database,
            PriceKind::Volume => &self.volume,
            PriceKind::DatabaseStorage => &self.database_storage,
            PriceKind::Snapshot => &self.snapshot,
        }
    }

    fn prices_mut(&mut self, kind: PriceKind) -> &mut HashMap<String, f64> {
        match kind {
            PriceKind::Compute => &mut self.compute,
            PriceKind::Database => &mut self.database,
            PriceKind::Volume => &mut self.volume,
            PriceKind::DatabaseStorage => &mut self.database_storage,
            PriceKind::Snapshot => &mut self.snapshot,
        }
    }

    /// Regions without an entry use the base list unchanged.
    fn region_multiplier(&self, region: &str) -> f64 {
        self.regions.get(region).copied().unwrap_or(1.0)
    }

    /// Unit price: hourly for compute/database, per GB-month for storage.
    pub fn unit_price(&self, kind: PriceKind, tier: &str, region: &str) -> Result<f64, PricingError> {
        self.prices(kind)
            .get(tier)
            .map(|base| base * self.region_multiplier(region))
            .ok_or_else(|| PricingError::MissingTier {
                kind,
                tier: tier.to_string(),
            })
    }

    pub fn monthly_instance_cost(&self, kind: PriceKind, tier: &str, region: &str) -> Result<Money, PricingError> {
        let hourly = self.unit_price(kind, tier, region)?;
        Ok(Money::from_dollars(hourly * HOURS_PER_MONTH))
    }

    /// Cost of running only `hours_per_week`, spread over an average month.
    pub fn monthly_scheduled_cost(
        &self,
        kind: PriceKind,
        tier: &str,
        hours_per_week: f64,
        region: &str,
    ) -> Result<Money, PricingError> {
        let hourly = self.unit_price(kind, tier, region)?;
        let hours = hours_per_week.clamp(0.0, HOURS_PER_WEEK) * HOURS_PER_MONTH / HOURS_PER_WEEK;
        Ok(Money::from_dollars(hourly * hours))
    }

    pub fn monthly_storage_cost(
        &self,
        kind: PriceKind,
        tier: &str,
        size_gb: f64,
        region: &str,
    ) -> Result<Money, PricingError> {
        let per_gb = self.unit_price(kind, tier, region)?;
        Ok(Money::from_dollars(per_gb * size_gb.max(0.0)))
    }
}

/// Instance sizes smallest first, with AWS normalization factors.
const SIZE_LADDER: [(&str, f64); 12] = [
    ("nano", 0.25),
    ("micro", 0.5),
    ("small", 1.0),
    ("medium", 2.0),
    ("large", 4.0),
    ("xlarge", 8.0),
    ("2xlarge", 16.0),
    ("4xlarge", 32.0),
    ("8xlarge", 64.0),
    ("12xlarge", 96.0),
    ("16xlarge", 128.0),
    ("24xlarge", 192.0),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Downsize {
    pub tier: String,
    /// Capacity of the current size over the smaller one.
    pub capacity_ratio: f64,
}

impl PricingTable {
    /// Largest smaller size in the same family that the book prices:
    /// `m5.xlarge` -> `m5.large`, but `m5.large` has nowhere to go since
    /// there is no priced `m5.medium` or below. `None` at the bottom of the
    /// ladder or for sizes the ladder does not know.
    pub fn next_smaller(&self, kind: PriceKind, tier: &str) -> Option<Downsize> {
        let (family, size) = tier.rsplit_once('.')?;
        if family.is_empty() {
            return None;
        }
        let index = SIZE_LADDER.iter().position(|(s, _)| *s == size)?;
        let (_, factor) = SIZE_LADDER[index];
        let prices = self.prices(kind);

        SIZE_LADDER[..index].iter().rev().find_map(|(smaller, smaller_factor)| {
            let candidate = format!("{family}.{smaller}");
            prices.contains_key(&candidate).then(|| Downsize {
                tier: candidate,
                capacity_ratio: factor / smaller_factor,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tier_is_an_error_not_zero() {
        let table = PricingTable::builtin();
        let err = table
            .unit_price(PriceKind::Compute, "x9.mega", "us-east-1")
            .unwrap_err();
        assert_eq!(
            err,
            PricingError::MissingTier {
                kind: PriceKind::Compute,
                tier: "x9.mega".into()
            }
        );
    }

    #[test]
    fn region_multiplier_applies() {
        let table = PricingTable::builtin();
        let us = table.monthly_storage_cost(PriceKind::Volume, "gp3", 100.0, "us-east-1").unwrap();
        let london = table.monthly_storage_cost(PriceKind::Volume, "gp3", 100.0, "eu-west-2").unwrap();
        let unknown = table.monthly_storage_cost(PriceKind::Volume, "gp3", 100.0, "mars-north-1").unwrap();
        assert_eq!(us.cents(), 800);
        assert_eq!(london.cents(), 960);
        assert_eq!(unknown, us);
    }

    #[test]
    fn instance_cost_uses_730_hours() {
        let mut table = PricingTable::empty("test");
        table.set(PriceKind::Compute, "t3.medium", 0.0416);
        let cost = table.monthly_instance_cost(PriceKind::Compute, "t3.medium", "us-east-1").unwrap();
        assert_eq!(cost.cents(), 3037);
    }

    #[test]
    fn scheduled_cost_scales_with_weekly_hours() {
        let table = PricingTable::builtin();
        let always = table
            .monthly_scheduled_cost(PriceKind::Compute, "t3.medium", HOURS_PER_WEEK, "us-east-1")
            .unwrap();
        assert_eq!(always, table.monthly_instance_cost(PriceKind::Compute, "t3.medium", "us-east-1").unwrap());
        let office = table
            .monthly_scheduled_cost(PriceKind::Compute, "t3.medium", 50.0, "us-east-1")
            .unwrap();
        assert_eq!(office.cents(), 904);
    }

    #[test]
    fn loads_from_toml() {
        let table = PricingTable::from_toml_str(
            r#"
            version = "2024-06"

            [volume]
            gp3 = 0.096

            [regions]
            "eu-west-2" = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(table.version(), "2024-06");
        assert_eq!(table.currency(), "USD");
        assert!(table.unit_price(PriceKind::Compute, "t3.micro", "eu-west-2").is_err());
    }

    #[test]
    fn rejects_negative_prices() {
        let err = PricingTable::from_toml_str("version = \"x\"\n[volume]\ngp3 = -1.0\n").unwrap_err();
        assert!(matches!(err, PricingError::Invalid(_)));
    }

    #[test]
    fn size_ladder() {
        let table = PricingTable::builtin();
        let step = table.next_smaller(PriceKind::Compute, "m5.xlarge").unwrap();
        assert_eq!(step.tier, "m5.large");
        assert_eq!(step.capacity_ratio, 2.0);

        let step = table.next_smaller(PriceKind::Database, "db.t3.medium").unwrap();
        assert_eq!(step.tier, "db.t3.small");

        assert!(table.next_smaller(PriceKind::Compute, "t3.nano").is_none());
        assert!(table.next_smaller(PriceKind::Compute, "m5.metal").is_none());
        assert!(table.next_smaller(PriceKind::Compute, "weird").is_none());
    }

    #[test]
    fn ladder_only_offers_priced_sizes() {
        let table = PricingTable::builtin();
        for tier in ["m5.large", "c5.large", "r5.large"] {
            assert_eq!(table.next_smaller(PriceKind::Compute, tier), None, "{tier}");
        }
        assert_eq!(table.next_smaller(PriceKind::Database, "db.r5.large"), None);

        // a gap in the book is skipped, and the ratio spans the whole step
        let mut table = PricingTable::empty("test");
        table.set(PriceKind::Compute, "c5.12xlarge", 2.04);
        table.set(PriceKind::Compute, "c5.4xlarge", 0.68);
        let step = table.next_smaller(PriceKind::Compute, "c5.12xlarge").unwrap();
        assert_eq!(step.tier, "c5.4xlarge");
        assert_eq!(step.capacity_ratio, 3.0);
    }
}
