//! Per-model sizing: every model or deployment named in the log gets its
//! own sweep, priced at that model's PAYGO rates.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::cost::{Horizon, PricingMap, PricingScheme};
use crate::error::SimError;
use crate::search::{self, SweepParams, SweepRange};
use crate::simulate::bucket_requests;
use crate::types::{MinuteDemand, Request};

/// Group key of requests whose log row names no model.
pub const UNKNOWN_MODEL: &str = "unknown";

pub struct ModelGroup {
    pub model: String,
    pub requests: usize,
    pub demand: Vec<MinuteDemand>,
}

/// Split requests by model, each group bucketed over its own span.
pub fn group_by_model(requests: &[Request]) -> Result<Vec<ModelGroup>, SimError> {
    let mut by_model: BTreeMap<&str, Vec<Request>> = BTreeMap::new();
    for r in requests {
        by_model
            .entry(r.model.as_deref().unwrap_or(UNKNOWN_MODEL))
            .or_default()
            .push(r.clone());
    }
    if by_model.is_empty() {
        return Err(SimError::EmptyInput);
    }

    by_model
        .into_iter()
        .map(|(model, reqs)| {
            Ok(ModelGroup {
                model: model.to_string(),
                requests: reqs.len(),
                demand: bucket_requests(&reqs)?,
            })
        })
        .collect()
}

/// Optimum of one model's sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRow {
    pub model: String,
    pub paygo_tier: String,
    pub requests: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub peak_tpm: f64,
    pub mean_tpm: f64,
    pub units: u32,
    pub capacity_tpm: f64,
    pub utilization_pct: f64,
    pub served_pct: f64,
    pub paygo_cost: f64,
    pub optimal_cost: f64,
    pub cost_delta: f64,
    pub cost_delta_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub scheme: String,
    pub horizon: Horizon,
    /// Most expensive model first.
    pub rows: Vec<BatchRow>,
    /// Models below the request threshold.
    pub skipped: Vec<String>,
    /// Models whose pricing or sweep failed, with the reason.
    pub failed: Vec<(String, String)>,
    pub total_units: u32,
    pub total_paygo_cost: f64,
    pub total_optimal_cost: f64,
}

impl BatchSummary {
    pub fn total_delta_pct(&self) -> f64 {
        if self.total_paygo_cost > 0.0 {
            (self.total_optimal_cost - self.total_paygo_cost) / self.total_paygo_cost * 100.0
        } else {
            0.0
        }
    }
}

/// Tier used for `model`: its own when priced, else the scheme's or the
/// configured default.
fn tier_for<'a>(
    model: &'a str,
    scheme: &'a PricingScheme,
    tiers: &dyn PricingMap,
    settings: &'a Settings,
) -> &'a str {
    if tiers.get(model).is_some() {
        return model;
    }
    let fallback = scheme.paygo_tier.as_deref().unwrap_or(&settings.paygo_tier);
    warn!(model, tier = fallback, "no PAYGO price for model, using fallback tier");
    fallback
}

fn evaluate_group(
    group: &ModelGroup,
    scheme: &PricingScheme,
    tiers: &dyn PricingMap,
    settings: &Settings,
) -> Result<BatchRow, SimError> {
    let tier = tier_for(&group.model, scheme, tiers, settings);
    let per_model = PricingScheme {
        paygo_tier: Some(tier.to_string()),
        ..scheme.clone()
    };
    let resolved = per_model.resolve(tiers, tier, settings.discount_pct)?;
    let weight = settings.output_weight_for(&resolved.paygo);

    let params = SweepParams {
        range: SweepRange {
            min_units: settings.min_units,
            max_units: settings.max_units,
            step: settings.step,
        },
        unit_tpm: settings.unit_tpm,
        output_weight: weight,
        horizon: settings.horizon,
    };
    let outcome = search::sweep(&group.demand, &resolved, &params)?;
    let Some(best) = outcome.optimal() else {
        return Err(SimError::EmptyInput);
    };

    let weighted: Vec<f64> = group.demand.iter().map(|d| d.weighted(weight)).collect();
    let peak_tpm = weighted.iter().copied().fold(0.0, f64::max);
    let mean_tpm = weighted.iter().sum::<f64>() / weighted.len().max(1) as f64;

    Ok(BatchRow {
        model: group.model.clone(),
        paygo_tier: resolved.paygo_tier.clone(),
        requests: group.requests,
        input_tokens: group.demand.iter().fold(0u64, |n, d| n.saturating_add(d.input_tokens)),
        output_tokens: group.demand.iter().fold(0u64, |n, d| n.saturating_add(d.output_tokens)),
        peak_tpm,
        mean_tpm,
        units: best.units,
        capacity_tpm: best.capacity_tpm,
        utilization_pct: best.utilization_pct,
        served_pct: best.served_pct,
        paygo_cost: outcome.baseline.total_cost,
        optimal_cost: best.total_cost,
        cost_delta: best.cost_delta,
        cost_delta_pct: best.cost_delta_pct,
    })
}

/// Sweep every group with at least `min_requests` requests under `scheme`.
/// A group that fails is recorded and the rest are still evaluated.
pub fn run_batch(
    groups: &[ModelGroup],
    scheme: &PricingScheme,
    tiers: &dyn PricingMap,
    settings: &Settings,
    min_requests: usize,
) -> BatchSummary {
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();

    for group in groups {
        if group.requests < min_requests {
            debug!(model = %group.model, requests = group.requests, "below request threshold");
            skipped.push(group.model.clone());
            continue;
        }
        match evaluate_group(group, scheme, tiers, settings) {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(model = %group.model, "{e}");
                failed.push((group.model.clone(), e.to_string()));
            }
        }
    }

    rows.sort_by(|a, b| b.optimal_cost.total_cmp(&a.optimal_cost));

    BatchSummary {
        scheme: scheme.name.clone(),
        horizon: settings.horizon,
        total_units: rows.iter().map(|r| r.units).sum(),
        total_paygo_cost: rows.iter().map(|r| r.paygo_cost).sum(),
        total_optimal_cost: rows.iter().map(|r| r.optimal_cost).sum(),
        rows,
        skipped,
        failed,
    }
}
