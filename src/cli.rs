use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::config::Overrides;
use crate::cost::Horizon;

#[derive(Parser, Debug)]
#[command(
    name = "ptusim",
    about = "Compare reserved throughput units against pay-as-you-go token billing"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Request log CSV file or directory of CSV files (repeatable)
    #[arg(long = "input", short = 'i', global = true)]
    pub inputs: Vec<PathBuf>,

    /// Config file (default: <config dir>/ptusim/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pricing scheme to evaluate (repeatable); "all" selects every scheme
    #[arg(long = "scheme", global = true)]
    pub schemes: Vec<String>,

    /// Throughput of one reserved unit in tokens per minute
    #[arg(long, global = true)]
    pub unit_tpm: Option<f64>,

    /// Smallest unit count to sweep
    #[arg(long, global = true)]
    pub min_units: Option<u32>,

    /// Largest unit count to sweep
    #[arg(long, global = true)]
    pub max_units: Option<u32>,

    /// Unit count increment of the sweep
    #[arg(long, global = true)]
    pub step: Option<u32>,

    /// Discount on the reservation price, in percent (e.g. 14.5)
    #[arg(long, global = true)]
    pub discount: Option<f64>,

    /// Capacity weight of one output token relative to one input token.
    /// Defaults to the PAYGO output/input price ratio.
    #[arg(long, global = true)]
    pub output_weight: Option<f64>,

    /// PAYGO tier or model name (looked up in LiteLLM prices if not configured)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Window costs are reported in
    #[arg(long, global = true)]
    pub horizon: Option<Horizon>,

    /// Output format: table (default), json
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Columns to display (comma-separated).
    /// Use +col to add, -col to remove from defaults, or plain names to replace.
    /// Available: units,capacity,reserved,paygo,total,delta,delta_pct,utilization,served,spilled
    #[arg(long, global = true, value_delimiter = ',', allow_hyphen_values = true)]
    pub columns: Option<Vec<String>>,

    /// Use cached model prices only, don't fetch
    #[arg(long, global = true)]
    pub offline: bool,

    /// Re-parse every input instead of using the input cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Suppress progress output (for scripting)
    #[arg(long, global = true)]
    pub cli: bool,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

pub const DEFAULT_COLUMNS: &[&str] = &[
    "units",
    "capacity",
    "total",
    "delta",
    "utilization",
    "served",
];

/// Resolve `--columns` into a final list.
/// - No flag → defaults
/// - All prefixed with +/- → modify defaults (e.g. `+reserved,-capacity`)
/// - Plain names → explicit replacement (e.g. `units,total,delta`)
pub fn resolve_columns(raw: Option<Vec<String>>) -> Vec<String> {
    let Some(raw) = raw else {
        return DEFAULT_COLUMNS.iter().map(|s| s.to_string()).collect();
    };

    let is_modifier = raw.iter().all(|c| c.starts_with('+') || c.starts_with('-'));

    if !is_modifier {
        return raw;
    }

    let mut cols: Vec<String> = DEFAULT_COLUMNS.iter().map(|s| s.to_string()).collect();
    for entry in &raw {
        if let Some(name) = entry.strip_prefix('+') {
            if !cols.iter().any(|c| c == name) {
                cols.push(name.to_string());
            }
        } else if let Some(name) = entry.strip_prefix('-') {
            cols.retain(|c| c != name);
        }
    }
    cols
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sweep reservation sizes and pick the optimum (default)
    Sweep,
    /// Per-minute simulation of one reservation size
    Simulate {
        /// Reserved unit count
        #[arg(long)]
        units: u32,
    },
    /// Per-day demand statistics
    Daily {
        /// Also count minutes over the capacity of this many units
        #[arg(long)]
        units: Option<u32>,
    },
    /// Bar chart of peak demand against capacity
    Plot {
        /// Reserved unit count drawn as capacity
        #[arg(long)]
        units: u32,
    },
    /// Sweep every model or deployment in the log separately, each at its
    /// own PAYGO prices, and summarize the optima
    Batch {
        /// Skip models with fewer requests than this
        #[arg(long, default_value_t = 0)]
        min_requests: usize,
    },
    /// List the selected pricing schemes
    Schemes,
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Sweep)
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            unit_tpm: self.unit_tpm,
            min_units: self.min_units,
            max_units: self.max_units,
            step: self.step,
            discount_pct: self.discount,
            output_weight: self.output_weight,
            horizon: self.horizon,
            model: self.model.clone(),
            schemes: self.schemes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_default_modify_replace() {
        assert_eq!(resolve_columns(None), DEFAULT_COLUMNS);

        let modified = resolve_columns(Some(vec!["+reserved".into(), "-capacity".into()]));
        assert!(modified.contains(&"reserved".to_string()));
        assert!(!modified.contains(&"capacity".to_string()));

        let replaced = resolve_columns(Some(vec!["units".into(), "total".into()]));
        assert_eq!(replaced, vec!["units", "total"]);
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ptusim", "simulate", "--units", "20", "-i", "a.csv", "--horizon", "annual", "-vv",
        ])
        .unwrap();
        assert!(matches!(cli.effective_command(), Command::Simulate { units: 20 }));
        assert_eq!(cli.inputs, vec![PathBuf::from("a.csv")]);
        assert_eq!(cli.horizon, Some(Horizon::Annual));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn batch_takes_a_request_threshold() {
        let cli = Cli::try_parse_from(["ptusim", "batch", "--min-requests", "10000", "-i", "logs"]).unwrap();
        assert!(matches!(cli.effective_command(), Command::Batch { min_requests: 10000 }));
    }

    #[test]
    fn sweep_is_the_default() {
        let cli = Cli::try_parse_from(["ptusim", "-i", "a.csv", "--scheme", "all"]).unwrap();
        assert!(matches!(cli.effective_command(), Command::Sweep));
        assert_eq!(cli.overrides().schemes, vec!["all"]);
    }
}
