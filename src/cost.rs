use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::types::{BucketResult, CapacityConfig, MinuteDemand};

pub const MINUTES_PER_YEAR: f64 = 365.25 * 24.0 * 60.0;
pub const MINUTES_PER_MONTH: f64 = MINUTES_PER_YEAR / 12.0;

/// Per-token pay-as-you-go pricing for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaygoPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
}

impl PaygoPricing {
    pub fn cost(&self, input_tokens: f64, output_tokens: f64) -> f64 {
        input_tokens * self.input_cost_per_token + output_tokens * self.output_cost_per_token
    }

    /// Output price relative to input price; 1.0 when input is free.
    pub fn price_ratio(&self) -> f64 {
        if self.input_cost_per_token <= 0.0 {
            return 1.0;
        }
        self.output_cost_per_token / self.input_cost_per_token
    }
}

/// Trait for looking up PAYGO pricing by tier or model name.
pub trait PricingMap {
    fn get(&self, tier: &str) -> Option<&PaygoPricing>;
}

impl PricingMap for BTreeMap<String, PaygoPricing> {
    fn get(&self, tier: &str) -> Option<&PaygoPricing> {
        BTreeMap::get(self, tier)
    }
}

/// Native billing period of a reservation price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Hour,
    Month,
    Year,
}

impl BillingPeriod {
    pub fn minutes(&self) -> f64 {
        match self {
            BillingPeriod::Hour => 60.0,
            BillingPeriod::Month => MINUTES_PER_MONTH,
            BillingPeriod::Year => MINUTES_PER_YEAR,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BillingPeriod::Hour => "hour",
            BillingPeriod::Month => "month",
            BillingPeriod::Year => "year",
        }
    }
}

/// A named reservation price as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingScheme {
    pub name: String,
    /// Price of one reserved unit per `period`.
    pub unit_price: f64,
    pub period: BillingPeriod,
    /// PAYGO tier used for spillover; the configured default when absent.
    #[serde(default)]
    pub paygo_tier: Option<String>,
}

/// A scheme with its discount applied and PAYGO tier looked up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedScheme {
    pub name: String,
    pub list_unit_price: f64,
    pub unit_price: f64,
    pub period: BillingPeriod,
    pub paygo_tier: String,
    pub paygo: PaygoPricing,
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl PricingScheme {
    pub fn resolve(
        &self,
        pricing: &dyn PricingMap,
        default_tier: &str,
        discount_pct: f64,
    ) -> Result<ResolvedScheme, SimError> {
        if !positive(self.unit_price) {
            return Err(SimError::pricing(
                &self.name,
                format!("unit price must be positive, got {}", self.unit_price),
            ));
        }
        if !(0.0..100.0).contains(&discount_pct) {
            return Err(SimError::pricing(
                &self.name,
                format!("discount must be in [0, 100), got {discount_pct}"),
            ));
        }

        let tier = self.paygo_tier.as_deref().unwrap_or(default_tier);
        let Some(paygo) = pricing.get(tier) else {
            return Err(SimError::pricing(&self.name, format!("unknown PAYGO tier '{tier}'")));
        };
        if !positive(paygo.input_cost_per_token) || !positive(paygo.output_cost_per_token) {
            return Err(SimError::pricing(
                &self.name,
                format!("PAYGO tier '{tier}' has a non-positive token price"),
            ));
        }

        Ok(ResolvedScheme {
            name: self.name.clone(),
            list_unit_price: self.unit_price,
            unit_price: self.unit_price * (1.0 - discount_pct / 100.0),
            period: self.period,
            paygo_tier: tier.to_string(),
            paygo: paygo.clone(),
        })
    }
}

/// Resolve every scheme independently. A scheme that fails is returned
/// among the errors and never prevents the others from resolving.
pub fn resolve_schemes(
    schemes: &[PricingScheme],
    pricing: &dyn PricingMap,
    default_tier: &str,
    discount_pct: f64,
) -> (Vec<ResolvedScheme>, Vec<SimError>) {
    let mut resolved = Vec::new();
    let mut failed = Vec::new();
    for scheme in schemes {
        match scheme.resolve(pricing, default_tier, discount_pct) {
            Ok(r) => resolved.push(r),
            Err(e) => failed.push(e),
        }
    }
    (resolved, failed)
}

/// Costs over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub reserved_cost: f64,
    pub paygo_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn new(reserved_cost: f64, paygo_cost: f64) -> Self {
        Self {
            reserved_cost,
            paygo_cost,
            total_cost: reserved_cost + paygo_cost,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.reserved_cost * factor, self.paygo_cost * factor)
    }
}

/// Fixed reservation cost for `units` over a window of `period_minutes`.
pub fn reserved_fixed_cost(units: u32, scheme: &ResolvedScheme, period_minutes: f64) -> f64 {
    units as f64 * scheme.unit_price * period_minutes / scheme.period.minutes()
}

/// Cost of one simulated configuration over the observed window.
pub fn price(buckets: &[BucketResult], scheme: &ResolvedScheme, config: &CapacityConfig) -> CostBreakdown {
    let (spilled_input, spilled_output) = buckets.iter().fold((0.0, 0.0), |(i, o), b| {
        (i + b.split.spilled_input, o + b.split.spilled_output)
    });
    let reserved = reserved_fixed_cost(config.units, scheme, buckets.len() as f64);
    CostBreakdown::new(reserved, scheme.paygo.cost(spilled_input, spilled_output))
}

/// Everything billed at PAYGO rates, no reservation.
pub fn paygo_baseline(demand: &[MinuteDemand], paygo: &PaygoPricing) -> CostBreakdown {
    let (input, output) = demand.iter().fold((0.0, 0.0), |(i, o), d| {
        (i + d.input_tokens as f64, o + d.output_tokens as f64)
    });
    CostBreakdown::new(0.0, paygo.cost(input, output))
}

/// Window that reported costs are projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Observed,
    Monthly,
    Annual,
}

impl Horizon {
    /// Multiplier from an observed window of `period_minutes` to this horizon.
    pub fn factor(&self, period_minutes: f64) -> f64 {
        if period_minutes <= 0.0 {
            return 0.0;
        }
        match self {
            Horizon::Observed => 1.0,
            Horizon::Monthly => MINUTES_PER_MONTH / period_minutes,
            Horizon::Annual => MINUTES_PER_YEAR / period_minutes,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Horizon::Observed => "observed window",
            Horizon::Monthly => "per month",
            Horizon::Annual => "per year",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{bucket_requests, simulate_demand};
    use crate::types::Request;
    use chrono::{TimeZone, Utc};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn tiers() -> BTreeMap<String, PaygoPricing> {
        let mut m = BTreeMap::new();
        m.insert(
            "default".to_string(),
            PaygoPricing {
                input_cost_per_token: 2e-6,
                output_cost_per_token: 8e-6,
            },
        );
        m.insert(
            "free".to_string(),
            PaygoPricing {
                input_cost_per_token: 0.0,
                output_cost_per_token: 1e-6,
            },
        );
        m
    }

    fn scheme(unit_price: f64, period: BillingPeriod, tier: Option<&str>) -> PricingScheme {
        PricingScheme {
            name: "test".to_string(),
            unit_price,
            period,
            paygo_tier: tier.map(str::to_string),
        }
    }

    #[test]
    fn resolve_applies_discount() {
        let r = scheme(200.0, BillingPeriod::Month, None)
            .resolve(&tiers(), "default", 25.0)
            .unwrap();
        assert!(approx(r.unit_price, 150.0));
        assert!(approx(r.list_unit_price, 200.0));
        assert_eq!(r.paygo_tier, "default");
    }

    #[test]
    fn unknown_tier_is_pricing_error() {
        let err = scheme(200.0, BillingPeriod::Month, Some("nope"))
            .resolve(&tiers(), "default", 0.0)
            .unwrap_err();
        assert!(matches!(err, SimError::Pricing { .. }));
    }

    #[test]
    fn non_positive_prices_are_pricing_errors() {
        assert!(scheme(0.0, BillingPeriod::Month, None)
            .resolve(&tiers(), "default", 0.0)
            .is_err());
        assert!(scheme(-5.0, BillingPeriod::Hour, None)
            .resolve(&tiers(), "default", 0.0)
            .is_err());
        assert!(scheme(10.0, BillingPeriod::Hour, Some("free"))
            .resolve(&tiers(), "default", 0.0)
            .is_err());
        assert!(scheme(10.0, BillingPeriod::Hour, None)
            .resolve(&tiers(), "default", 100.0)
            .is_err());
    }

    #[test]
    fn broken_scheme_does_not_block_the_others() {
        let schemes = vec![
            scheme(200.0, BillingPeriod::Month, Some("nope")),
            PricingScheme {
                name: "good".to_string(),
                ..scheme(1.0, BillingPeriod::Hour, None)
            },
        ];
        let (resolved, failed) = resolve_schemes(&schemes, &tiers(), "default", 0.0);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "good");
        assert_eq!(failed.len(), 1);
        assert!(matches!(&failed[0], SimError::Pricing { scheme, .. } if scheme == "test"));
    }

    #[test]
    fn reserved_cost_scales_with_window() {
        let r = scheme(1.0, BillingPeriod::Hour, None)
            .resolve(&tiers(), "default", 0.0)
            .unwrap();
        // 10 units for 30 minutes at $1/hour each
        assert!(approx(reserved_fixed_cost(10, &r, 30.0), 5.0));

        let monthly = scheme(260.0, BillingPeriod::Month, None)
            .resolve(&tiers(), "default", 0.0)
            .unwrap();
        assert!(approx(reserved_fixed_cost(2, &monthly, MINUTES_PER_MONTH), 520.0));
    }

    #[test]
    fn price_bills_spillover_at_paygo() {
        let requests = vec![Request {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 18, 10, 0, 0).unwrap(),
            input_tokens: 1000,
            output_tokens: 0,
            model: None,
        }];
        let demand = bucket_requests(&requests).unwrap();
        let config = CapacityConfig::new(1, 500.0, 1.0);
        let sim = simulate_demand(&demand, config).unwrap();
        let r = scheme(60.0, BillingPeriod::Hour, None)
            .resolve(&tiers(), "default", 0.0)
            .unwrap();

        let cost = price(&sim.buckets, &r, &config);
        // one minute of a $60/hour unit + 500 spilled input tokens
        assert!(approx(cost.reserved_cost, 1.0));
        assert!(approx(cost.paygo_cost, 500.0 * 2e-6));
        assert!(approx(cost.total_cost, 1.0 + 500.0 * 2e-6));

        let base = paygo_baseline(&demand, &r.paygo);
        assert!(approx(base.total_cost, 1000.0 * 2e-6));
        assert_eq!(base.reserved_cost, 0.0);
    }

    #[test]
    fn horizon_projection() {
        assert_eq!(Horizon::Observed.factor(120.0), 1.0);
        assert!(approx(Horizon::Monthly.factor(MINUTES_PER_MONTH), 1.0));
        assert!(approx(Horizon::Annual.factor(MINUTES_PER_MONTH), 12.0));
        assert_eq!(Horizon::Monthly.factor(0.0), 0.0);

        let c = CostBreakdown::new(2.0, 3.0).scaled(2.0);
        assert_eq!(c, CostBreakdown::new(4.0, 6.0));
    }

    #[test]
    fn price_ratio_falls_back_to_one() {
        assert!(approx(tiers()["default"].price_ratio(), 4.0));
        assert_eq!(tiers()["free"].price_ratio(), 1.0);
    }
}
