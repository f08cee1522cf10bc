use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized consumption event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model or deployment that served the call, when the log names one.
    #[serde(default)]
    pub model: Option<String>,
}

impl Request {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Raw demand of one minute. Gap minutes carry zero tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinuteDemand {
    pub minute: DateTime<Utc>,
    pub requests: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl MinuteDemand {
    pub fn weighted(&self, output_weight: f64) -> f64 {
        self.input_tokens as f64 + self.output_tokens as f64 * output_weight
    }
}

/// Reserved capacity under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapacityConfig {
    pub units: u32,
    pub capacity_tpm: f64,
    pub output_weight: f64,
}

impl CapacityConfig {
    pub fn new(units: u32, unit_tpm: f64, output_weight: f64) -> Self {
        Self {
            units,
            capacity_tpm: units as f64 * unit_tpm,
            output_weight,
        }
    }
}

/// Served/spilled raw token counts of one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenSplit {
    pub served_input: f64,
    pub served_output: f64,
    pub spilled_input: f64,
    pub spilled_output: f64,
}

impl TokenSplit {
    pub fn accumulate(&mut self, other: &TokenSplit) {
        self.served_input += other.served_input;
        self.served_output += other.served_output;
        self.spilled_input += other.spilled_input;
        self.spilled_output += other.spilled_output;
    }

    pub fn served(&self) -> f64 {
        self.served_input + self.served_output
    }

    pub fn spilled(&self) -> f64 {
        self.spilled_input + self.spilled_output
    }
}

/// Outcome of one minute bucket against a fixed capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketResult {
    pub minute: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub weighted_demand: f64,
    pub served_weighted: f64,
    pub spilled_weighted: f64,
    #[serde(flatten)]
    pub split: TokenSplit,
    pub utilization_pct: f64,
}

/// One swept configuration's outcome, costs expressed in the reporting horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRow {
    pub units: u32,
    pub capacity_tpm: f64,
    pub reserved_cost: f64,
    pub paygo_cost: f64,
    pub total_cost: f64,
    pub cost_delta: f64,
    pub cost_delta_pct: f64,
    pub utilization_pct: f64,
    pub served_pct: f64,
    pub spilled_pct: f64,
    #[serde(flatten)]
    pub tokens: TokenSplit,
    pub optimal: bool,
}
