//! Per-minute replay of demand against a reserved token budget.
//!
//! Capacity resets fully at every minute boundary: unused budget is not
//! carried forward and spillover is never deferred to a later minute.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::error::SimError;
use crate::types::{BucketResult, CapacityConfig, MinuteDemand, Request, TokenSplit};

pub fn minute_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    // Only fails for timestamps outside chrono's nanosecond range
    ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}

/// Group requests into minute buckets spanning first..=last minute,
/// synthesizing zero-demand buckets for minutes without traffic.
pub fn bucket_requests(requests: &[Request]) -> Result<Vec<MinuteDemand>, SimError> {
    let mut by_minute: BTreeMap<DateTime<Utc>, MinuteDemand> = BTreeMap::new();
    for r in requests {
        let minute = minute_of(r.timestamp);
        let bucket = by_minute.entry(minute).or_insert_with(|| MinuteDemand {
            minute,
            ..Default::default()
        });
        bucket.requests += 1;
        bucket.input_tokens = bucket.input_tokens.saturating_add(r.input_tokens);
        bucket.output_tokens = bucket.output_tokens.saturating_add(r.output_tokens);
    }

    let (Some(&first), Some(&last)) = (by_minute.keys().next(), by_minute.keys().next_back()) else {
        return Err(SimError::EmptyInput);
    };

    let span = (last - first).num_minutes() as usize + 1;
    let mut out = Vec::with_capacity(span);
    let mut minute = first;
    while minute <= last {
        out.push(by_minute.remove(&minute).unwrap_or(MinuteDemand {
            minute,
            ..Default::default()
        }));
        minute += Duration::minutes(1);
    }
    Ok(out)
}

/// Split a bucket's raw input/output tokens into served and spilled parts.
///
/// Both parts keep the bucket's input:output ratio: the served fraction is
/// `served_weighted / weighted_demand` for either token type.
pub fn split_bucket(
    input_tokens: u64,
    output_tokens: u64,
    weighted_demand: f64,
    served_weighted: f64,
) -> TokenSplit {
    if weighted_demand <= 0.0 {
        return TokenSplit::default();
    }
    let fraction = (served_weighted / weighted_demand).clamp(0.0, 1.0);
    let input = input_tokens as f64;
    let output = output_tokens as f64;
    let served_input = input * fraction;
    let served_output = output * fraction;
    TokenSplit {
        served_input,
        served_output,
        spilled_input: input - served_input,
        spilled_output: output - served_output,
    }
}

pub fn validate_capacity(capacity_tpm: f64, output_weight: f64) -> Result<(), SimError> {
    if !capacity_tpm.is_finite() || capacity_tpm <= 0.0 {
        return Err(SimError::InvalidCapacity(format!(
            "capacity_tpm must be positive, got {capacity_tpm}"
        )));
    }
    if !output_weight.is_finite() || output_weight < 1.0 {
        return Err(SimError::InvalidCapacity(format!(
            "output_weight must be at least 1, got {output_weight}"
        )));
    }
    Ok(())
}

fn simulate_bucket(demand: &MinuteDemand, capacity_tpm: f64, output_weight: f64) -> BucketResult {
    let weighted_demand = demand.weighted(output_weight);
    let served_weighted = weighted_demand.min(capacity_tpm);
    let spilled_weighted = weighted_demand - served_weighted;
    let split = split_bucket(
        demand.input_tokens,
        demand.output_tokens,
        weighted_demand,
        served_weighted,
    );
    BucketResult {
        minute: demand.minute,
        input_tokens: demand.input_tokens,
        output_tokens: demand.output_tokens,
        weighted_demand,
        served_weighted,
        spilled_weighted,
        split,
        utilization_pct: (served_weighted / capacity_tpm * 100.0).clamp(0.0, 100.0),
    }
}

/// Result of replaying one capacity configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub config: CapacityConfig,
    pub buckets: Vec<BucketResult>,
}

impl Simulation {
    /// Mean of per-minute utilization over the full span, empty minutes included.
    pub fn mean_utilization_pct(&self) -> f64 {
        if self.buckets.is_empty() {
            return 0.0;
        }
        self.buckets.iter().map(|b| b.utilization_pct).sum::<f64>() / self.buckets.len() as f64
    }

    pub fn totals(&self) -> TokenSplit {
        let mut totals = TokenSplit::default();
        for b in &self.buckets {
            totals.accumulate(&b.split);
        }
        totals
    }

    /// Observed window length in minutes (one per bucket).
    pub fn period_minutes(&self) -> usize {
        self.buckets.len()
    }
}

/// Replay pre-bucketed demand. Buckets are independent of each other.
pub fn simulate_demand(demand: &[MinuteDemand], config: CapacityConfig) -> Result<Simulation, SimError> {
    validate_capacity(config.capacity_tpm, config.output_weight)?;
    if demand.is_empty() {
        return Err(SimError::EmptyInput);
    }
    let buckets = demand
        .iter()
        .map(|d| simulate_bucket(d, config.capacity_tpm, config.output_weight))
        .collect();
    Ok(Simulation { config, buckets })
}

/// Bucket `requests` and replay them against `capacity_tpm`.
pub fn simulate(requests: &[Request], capacity_tpm: f64, output_weight: f64) -> Result<Vec<BucketResult>, SimError> {
    validate_capacity(capacity_tpm, output_weight)?;
    let demand = bucket_requests(requests)?;
    let config = CapacityConfig {
        units: 0,
        capacity_tpm,
        output_weight,
    };
    Ok(simulate_demand(&demand, config)?.buckets)
}
