//! Sweep of candidate reservation sizes and selection of the optimum.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::cost::{self, CostBreakdown, Horizon, ResolvedScheme};
use crate::error::SimError;
use crate::simulate::{simulate_demand, validate_capacity};
use crate::types::{CapacityConfig, EvaluationRow, MinuteDemand, TokenSplit};

/// Unit counts to sweep, inclusive of `min` and of `max` when on a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepRange {
    pub min_units: u32,
    pub max_units: u32,
    pub step: u32,
}

impl SweepRange {
    pub fn candidates(&self) -> Result<Vec<u32>, SimError> {
        if self.step == 0 {
            return Err(SimError::InvalidCapacity("sweep step must be positive".into()));
        }
        if self.min_units == 0 || self.min_units > self.max_units {
            return Err(SimError::InvalidCapacity(format!(
                "unit range {}..={} is empty or starts at zero",
                self.min_units, self.max_units
            )));
        }
        Ok((self.min_units..=self.max_units)
            .step_by(self.step as usize)
            .collect())
    }
}

/// Everything the sweep needs besides the demand itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParams {
    pub range: SweepRange,
    pub unit_tpm: f64,
    pub output_weight: f64,
    pub horizon: Horizon,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome {
    pub scheme: String,
    pub horizon: Horizon,
    pub period_minutes: usize,
    pub baseline: CostBreakdown,
    /// Sorted by unit count ascending; exactly one row has `optimal` set.
    pub rows: Vec<EvaluationRow>,
}

impl SweepOutcome {
    pub fn optimal(&self) -> Option<&EvaluationRow> {
        self.rows.iter().find(|r| r.optimal)
    }
}

fn pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn evaluate(
    demand: &[MinuteDemand],
    units: u32,
    params: &SweepParams,
    scheme: &ResolvedScheme,
    baseline_total: f64,
) -> Result<EvaluationRow, SimError> {
    let config = CapacityConfig::new(units, params.unit_tpm, params.output_weight);
    let sim = simulate_demand(demand, config)?;
    let factor = params.horizon.factor(sim.period_minutes() as f64);
    let cost = cost::price(&sim.buckets, scheme, &config).scaled(factor);
    let tokens: TokenSplit = sim.totals();
    let all_tokens = tokens.served() + tokens.spilled();

    debug!(
        scheme = %scheme.name,
        units,
        total_cost = cost.total_cost,
        "evaluated candidate"
    );

    Ok(EvaluationRow {
        units,
        capacity_tpm: config.capacity_tpm,
        reserved_cost: cost.reserved_cost,
        paygo_cost: cost.paygo_cost,
        total_cost: cost.total_cost,
        cost_delta: cost.total_cost - baseline_total,
        cost_delta_pct: pct(cost.total_cost - baseline_total, baseline_total),
        utilization_pct: sim.mean_utilization_pct(),
        served_pct: pct(tokens.served(), all_tokens),
        spilled_pct: pct(tokens.spilled(), all_tokens),
        tokens,
        optimal: false,
    })
}

fn min_index_by(
    rows: &[EvaluationRow],
    keep: impl Fn(&EvaluationRow) -> bool,
    key: impl Fn(&EvaluationRow) -> f64,
) -> Option<usize> {
    // min_by keeps the first of equal elements, i.e. the lower unit count
    rows.iter()
        .enumerate()
        .filter(|(_, r)| keep(*r))
        .min_by(|(_, a), (_, b)| {
            key(*a)
                .partial_cmp(&key(*b))
                .unwrap_or(Ordering::Equal)
                .then(a.units.cmp(&b.units))
        })
        .map(|(i, _)| i)
}

/// Index of the optimum among `rows` (sorted by units ascending).
///
/// Among rows costing at least the baseline, the one closest to it wins;
/// if every row undercuts the baseline, the cheapest wins. Ties go to the
/// lower unit count.
pub fn select_optimal(rows: &[EvaluationRow]) -> Option<usize> {
    min_index_by(rows, |r| r.cost_delta >= 0.0, |r| r.cost_delta)
        .or_else(|| min_index_by(rows, |_| true, |r| r.total_cost))
}

/// Evaluate every candidate of `params.range` under `scheme`.
///
/// Candidates are independent and evaluated in parallel; the result does
/// not depend on scheduling.
pub fn sweep(
    demand: &[MinuteDemand],
    scheme: &ResolvedScheme,
    params: &SweepParams,
) -> Result<SweepOutcome, SimError> {
    if demand.is_empty() {
        return Err(SimError::EmptyInput);
    }
    validate_capacity(params.unit_tpm, params.output_weight)?;
    let candidates = params.range.candidates()?;

    let period_minutes = demand.len();
    let factor = params.horizon.factor(period_minutes as f64);
    let baseline = cost::paygo_baseline(demand, &scheme.paygo).scaled(factor);

    let mut rows = candidates
        .par_iter()
        .map(|&units| evaluate(demand, units, params, scheme, baseline.total_cost))
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by_key(|r| r.units);

    if let Some(i) = select_optimal(&rows) {
        rows[i].optimal = true;
    }

    Ok(SweepOutcome {
        scheme: scheme.name.clone(),
        horizon: params.horizon,
        period_minutes,
        baseline,
        rows,
    })
}
