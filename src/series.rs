//! Fixed-window utilization series.
//!
//! A `Series` is what a collector hands the decision engine for one metric
//! of one resource. The window and granularity travel with the points so
//! rules can tell a short series from a quiet one.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Datapoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Datapoint { timestamp, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    window: Duration,
    granularity: Duration,
    points: Vec<Datapoint>,
}

impl Series {
    /// Non-finite samples are dropped and points are ordered by timestamp.
    pub fn new(window: Duration, granularity: Duration, mut points: Vec<Datapoint>) -> Self {
        points.retain(|p| p.value.is_finite());
        points.sort_by_key(|p| p.timestamp);
        Series {
            window,
            granularity,
            points,
        }
    }

    pub fn empty(window: Duration, granularity: Duration) -> Self {
        Series::new(window, granularity, Vec::new())
    }

    pub fn points(&self) -> &[Datapoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    pub fn window_days(&self) -> u32 {
        (self.window.as_secs() / 86_400) as u32
    }

    pub fn expected_points(&self) -> usize {
        let step = self.granularity.as_secs().max(1);
        (self.window.as_secs() / step).max(1) as usize
    }

    /// Fraction of the window that has samples, capped at 1.0.
    pub fn coverage(&self) -> f64 {
        (self.points.len() as f64 / self.expected_points() as f64).min(1.0)
    }

    pub fn covers(&self, min_coverage: f64) -> bool {
        !self.points.is_empty() && self.coverage() >= min_coverage
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.sum() / self.points.len() as f64)
    }

    pub fn sum(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }

    pub fn max(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value).reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value).reduce(f64::min)
    }

    /// Nearest-rank percentile, `p` in 0..=100.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.points.iter().map(|p| p.value).collect();
        values.sort_by(f64::total_cmp);
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * values.len() as f64).ceil() as usize;
        Some(values[rank.saturating_sub(1).min(values.len() - 1)])
    }

    /// Mean per UTC calendar day.
    pub fn daily_means(&self) -> BTreeMap<NaiveDate, f64> {
        let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for point in &self.points {
            let bucket = buckets.entry(point.timestamp.date_naive()).or_insert((0.0, 0));
            bucket.0 += point.value;
            bucket.1 += 1;
        }
        buckets
            .into_iter()
            .map(|(day, (sum, count))| (day, sum / count as f64))
            .collect()
    }

    pub fn busiest_day(&self) -> Option<f64> {
        self.daily_means().into_values().reduce(f64::max)
    }

    /// Pointwise sum of two series sampled on the same timestamps, used for
    /// read + write operations. Timestamps missing from either side are dropped.
    pub fn combine(&self, other: &Series) -> Series {
        let theirs: BTreeMap<DateTime<Utc>, f64> =
            other.points.iter().map(|p| (p.timestamp, p.value)).collect();
        let points = self
            .points
            .iter()
            .filter_map(|p| theirs.get(&p.timestamp).map(|v| Datapoint::new(p.timestamp, p.value + v)))
            .collect();
        Series::new(self.window, self.granularity, points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(3600);
    const DAY: Duration = Duration::from_secs(86_400);

    fn hourly(values: &[f64]) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| Datapoint::new(start + chrono::Duration::hours(i as i64), *v))
            .collect();
        Series::new(DAY * 2, HOUR, points)
    }

    #[test]
    fn coverage_counts_expected_slots() {
        let full = hourly(&[1.0; 48]);
        assert_eq!(full.expected_points(), 48);
        assert!(full.covers(0.9));

        let half = hourly(&[1.0; 24]);
        assert!((half.coverage() - 0.5).abs() < f64::EPSILON);
        assert!(!half.covers(0.9));

        assert!(!Series::empty(DAY, HOUR).covers(0.0));
    }

    #[test]
    fn statistics() {
        let series = hourly(&[1.0, 2.0, 3.0, 4.0, f64::NAN]);
        assert_eq!(series.len(), 4);
        assert_eq!(series.mean(), Some(2.5));
        assert_eq!(series.max(), Some(4.0));
        assert_eq!(series.min(), Some(1.0));
        assert_eq!(series.percentile(50.0), Some(2.0));
        assert_eq!(series.percentile(95.0), Some(4.0));
        assert_eq!(series.percentile(0.0), Some(1.0));
    }

    #[test]
    fn one_busy_day_shows_in_daily_means() {
        let mut values = vec![1.0; 24];
        values.extend(vec![40.0; 24]);
        let series = hourly(&values);
        let days = series.daily_means();
        assert_eq!(days.len(), 2);
        assert_eq!(series.busiest_day(), Some(40.0));
    }

    #[test]
    fn combine_sums_matching_timestamps() {
        let reads = hourly(&[1.0, 2.0, 3.0]);
        let writes = hourly(&[10.0, 20.0]);
        let total = reads.combine(&writes);
        assert_eq!(total.len(), 2);
        assert_eq!(total.sum(), 33.0);
    }
}
