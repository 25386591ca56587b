use super::{depth_severity, RuleOutcome, Rules, Verdict};
use crate::collect::InstanceSnapshot;
use crate::config::Thresholds;
use crate::error::PricingError;
use crate::model::{
    DownsizeScenario, Ec2Kind, Evidence, FindingKind, Money, RdsKind, RightsizingEvidence, SavingsScenarios,
    UtilizationEvidence,
};
use crate::pricing::PriceKind;
use crate::series::Series;

pub(crate) const CPU_METRIC: &str = "CPUUtilization";

/// Window statistics of a utilization series that covers enough of the
/// window to be trusted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Utilization {
    pub average: f64,
    pub peak: f64,
    pub p95: f64,
    pub busiest_day: f64,
    pub datapoints: usize,
    pub window_days: u32,
}

impl Utilization {
    pub(crate) fn of(series: &Series, thresholds: &Thresholds) -> Option<Utilization> {
        if !series.covers(thresholds.min_window_coverage) {
            return None;
        }
        Some(Utilization {
            average: series.mean()?,
            peak: series.max()?,
            p95: series.percentile(95.0)?,
            busiest_day: series.busiest_day()?,
            datapoints: series.len(),
            window_days: series.window_days(),
        })
    }

    /// Below the idle threshold on average and on every single day.
    pub(crate) fn is_idle(&self, thresholds: &Thresholds) -> bool {
        self.average < thresholds.idle_cpu_percent && self.busiest_day < thresholds.idle_cpu_percent
    }

    pub(crate) fn evidence(
        &self,
        tier: &str,
        uptime_days: Option<i64>,
        peak_connections: Option<f64>,
        monthly_cost: Money,
    ) -> UtilizationEvidence {
        UtilizationEvidence {
            metric: CPU_METRIC.to_string(),
            tier: tier.to_string(),
            average: self.average,
            peak: self.peak,
            busiest_day: self.busiest_day,
            datapoints: self.datapoints,
            window_days: self.window_days,
            uptime_days,
            peak_connections,
            monthly_cost,
            scenarios: None,
        }
    }
}

pub(crate) fn instance_rules(rules: &Rules<'_>, instance: &InstanceSnapshot) -> Vec<(FindingKind, RuleOutcome)> {
    let Some(cpu) = &instance.cpu else {
        // not running: nothing billed for compute
        return Vec::new();
    };
    let Some(utilization) = Utilization::of(cpu, rules.thresholds) else {
        return vec![
            (FindingKind::Ec2(Ec2Kind::IdleInstance), Ok(Verdict::Skipped("insufficient CPU coverage"))),
            (
                FindingKind::Ec2(Ec2Kind::OversizedInstance),
                Ok(Verdict::Skipped("insufficient CPU coverage")),
            ),
        ];
    };

    vec![
        (FindingKind::Ec2(Ec2Kind::IdleInstance), idle_instance(rules, instance, &utilization)),
        (
            FindingKind::Ec2(Ec2Kind::OversizedInstance),
            oversized(
                rules,
                Sizing {
                    kind: FindingKind::Ec2(Ec2Kind::OversizedInstance),
                    price_kind: PriceKind::Compute,
                    resource_id: &instance.record.id,
                    resource_name: instance.record.name.as_deref(),
                    tier: &instance.record.instance_type,
                },
                &utilization,
            ),
        ),
    ]
}

fn idle_instance(rules: &Rules<'_>, instance: &InstanceSnapshot, utilization: &Utilization) -> RuleOutcome {
    if !utilization.is_idle(rules.thresholds) {
        return Ok(Verdict::Clean);
    }
    let tier = &instance.record.instance_type;
    let cost = rules
        .pricing
        .monthly_instance_cost(PriceKind::Compute, tier, rules.region)?;
    let severity = rules
        .spend_severity(cost)
        .max(depth_severity(utilization.average, rules.thresholds));

    let mut evidence = utilization.evidence(tier, Some(instance.uptime_days), None, cost);
    evidence.scenarios = Some(scenarios(rules, tier, cost)?);

    Ok(rules.finding(
        &instance.record.id,
        instance.record.name.as_deref(),
        FindingKind::Ec2(Ec2Kind::IdleInstance),
        severity,
        cost,
        Evidence::Utilization(evidence),
        format!(
            "Stop or terminate this {tier}: CPU averaged {:.1}% over {} days and never topped {:.1}% on any day",
            utilization.average, utilization.window_days, utilization.busiest_day
        ),
    ))
}

/// What else could be done with an idle instance short of terminating it.
fn scenarios(rules: &Rules<'_>, tier: &str, current: Money) -> Result<SavingsScenarios, PricingError> {
    let scheduled = rules.pricing.monthly_scheduled_cost(
        PriceKind::Compute,
        tier,
        rules.thresholds.schedule_hours_per_week,
        rules.region,
    )?;
    let downsize = match rules.pricing.next_smaller(PriceKind::Compute, tier) {
        Some(step) => {
            let smaller = rules
                .pricing
                .monthly_instance_cost(PriceKind::Compute, &step.tier, rules.region)?;
            Some(DownsizeScenario {
                tier: step.tier,
                savings: current.saturating_sub(smaller),
            })
        }
        None => None,
    };
    Ok(SavingsScenarios {
        schedule: current.saturating_sub(scheduled),
        downsize,
        terminate: current,
    })
}

/// Resource under consideration for a one-step downsize.
pub(crate) struct Sizing<'a> {
    pub kind: FindingKind,
    pub price_kind: PriceKind,
    pub resource_id: &'a str,
    pub resource_name: Option<&'a str>,
    pub tier: &'a str,
}

/// One step down the size ladder, when the observed p95 scaled to the
/// smaller size stays under the comfortable ceiling. Runs regardless of
/// the idle rule.
pub(crate) fn oversized(rules: &Rules<'_>, sizing: Sizing<'_>, utilization: &Utilization) -> RuleOutcome {
    let Some(step) = rules.pricing.next_smaller(sizing.price_kind, sizing.tier) else {
        return Ok(Verdict::Clean);
    };
    let projected = utilization.p95 * step.capacity_ratio;
    if projected >= rules.thresholds.oversize_ceiling_percent {
        return Ok(Verdict::Clean);
    }

    let current = rules
        .pricing
        .monthly_instance_cost(sizing.price_kind, sizing.tier, rules.region)?;
    let recommended = rules
        .pricing
        .monthly_instance_cost(sizing.price_kind, &step.tier, rules.region)?;
    let savings = current.saturating_sub(recommended);

    let recommendation = format!(
        "Downsize from {} to {}: p95 CPU of {:.1}% would run at about {:.1}% on the smaller size",
        sizing.tier, step.tier, utilization.p95, projected
    );
    Ok(rules.finding(
        sizing.resource_id,
        sizing.resource_name,
        sizing.kind,
        rules.spend_severity(savings),
        savings,
        Evidence::Rightsizing(RightsizingEvidence {
            metric: CPU_METRIC.to_string(),
            current_tier: sizing.tier.to_string(),
            recommended_tier: step.tier,
            average: utilization.average,
            p95: utilization.p95,
            projected_p95: projected,
            current_cost: current,
            recommended_cost: recommended,
        }),
        recommendation,
    ))
}

/// RDS classes share the compute ladder.
pub(crate) fn database_sizing<'a>(id: &'a str, class: &'a str) -> Sizing<'a> {
    Sizing {
        kind: FindingKind::Rds(RdsKind::OversizedDatabase),
        price_kind: PriceKind::Database,
        resource_id: id,
        resource_name: None,
        tier: class,
    }
}
