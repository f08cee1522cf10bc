use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::warn;

use crate::cost::{BillingPeriod, Horizon, PaygoPricing, PricingScheme};

pub const DEFAULT_UNIT_TPM: f64 = 3000.0;
pub const DEFAULT_MIN_UNITS: u32 = 15;
pub const DEFAULT_MAX_UNITS: u32 = 100;
pub const DEFAULT_STEP: u32 = 5;
pub const DEFAULT_TIER: &str = "default";
pub const DEFAULT_SCHEME: &str = "yearly-reservation";

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub unit_tpm: Option<f64>,
    pub min_units: Option<u32>,
    pub max_units: Option<u32>,
    pub step: Option<u32>,
    pub discount_pct: Option<f64>,
    pub output_weight: Option<f64>,
    pub horizon: Option<Horizon>,
    pub paygo_tier: Option<String>,
    pub default_scheme: Option<String>,
    #[serde(default)]
    pub paygo: BTreeMap<String, PaygoPricing>,
    #[serde(default)]
    pub schemes: Vec<PricingScheme>,
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ptusim").map(|d| d.config_dir().join("config.toml"))
}

pub fn parse_config(data: &str) -> Result<Config> {
    Ok(toml::from_str(data)?)
}

/// Load `explicit` (errors are fatal) or the default config file
/// (errors only warn).
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let data = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        return parse_config(&data).with_context(|| format!("invalid config {}", path.display()));
    }

    let Some(path) = default_config_path() else {
        return Ok(Config::default());
    };
    let Ok(data) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };

    match parse_config(&data) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("invalid config at {}: {:#}", path.display(), e);
            Ok(Config::default())
        }
    }
}

/// Reservation prices of the hosted-model offering the tool was built around.
pub fn default_schemes() -> Vec<PricingScheme> {
    let scheme = |name: &str, unit_price: f64, period: BillingPeriod| PricingScheme {
        name: name.to_string(),
        unit_price,
        period,
        paygo_tier: None,
    };
    vec![
        scheme("monthly-reservation", 260.0, BillingPeriod::Month),
        scheme("yearly-reservation", 221.0, BillingPeriod::Month),
        scheme("hourly-global", 1.0, BillingPeriod::Hour),
        scheme("hourly-data-zone", 1.1, BillingPeriod::Hour),
        scheme("hourly-regional", 2.0, BillingPeriod::Hour),
        scheme("monthly-commitment", 312.0, BillingPeriod::Month),
    ]
}

/// $0.002 / 1K input and $0.008 / 1K output tokens.
pub fn default_paygo() -> PaygoPricing {
    PaygoPricing {
        input_cost_per_token: 2e-6,
        output_cost_per_token: 8e-6,
    }
}

/// Command-line values that override the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub unit_tpm: Option<f64>,
    pub min_units: Option<u32>,
    pub max_units: Option<u32>,
    pub step: Option<u32>,
    pub discount_pct: Option<f64>,
    pub output_weight: Option<f64>,
    pub horizon: Option<Horizon>,
    pub model: Option<String>,
    pub schemes: Vec<String>,
}

/// Fully merged, immutable settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub unit_tpm: f64,
    pub min_units: u32,
    pub max_units: u32,
    pub step: u32,
    pub discount_pct: f64,
    /// Explicit weight; derived from the PAYGO tier's price ratio when absent.
    pub output_weight: Option<f64>,
    pub horizon: Horizon,
    pub paygo_tier: String,
    pub paygo: BTreeMap<String, PaygoPricing>,
    pub schemes: Vec<PricingScheme>,
}

impl Settings {
    /// Merge CLI > config file > built-in defaults.
    pub fn resolve(config: Config, cli: &Overrides) -> Result<Settings> {
        let mut paygo = config.paygo;
        if paygo.is_empty() {
            paygo.insert(DEFAULT_TIER.to_string(), default_paygo());
        }

        let all_schemes = if config.schemes.is_empty() {
            default_schemes()
        } else {
            config.schemes
        };

        let wanted: Vec<String> = if cli.schemes.is_empty() {
            vec![config
                .default_scheme
                .unwrap_or_else(|| default_scheme_name(&all_schemes))]
        } else {
            cli.schemes.clone()
        };
        let schemes = select_schemes(&all_schemes, &wanted)?;

        let paygo_tier = cli
            .model
            .clone()
            .or(config.paygo_tier)
            .unwrap_or_else(|| DEFAULT_TIER.to_string());

        let output_weight = cli.output_weight.or(config.output_weight);
        if let Some(w) = output_weight {
            if !w.is_finite() || w < 1.0 {
                bail!("output weight must be at least 1, got {w}");
            }
        }

        Ok(Settings {
            unit_tpm: cli.unit_tpm.or(config.unit_tpm).unwrap_or(DEFAULT_UNIT_TPM),
            min_units: cli.min_units.or(config.min_units).unwrap_or(DEFAULT_MIN_UNITS),
            max_units: cli.max_units.or(config.max_units).unwrap_or(DEFAULT_MAX_UNITS),
            step: cli.step.or(config.step).unwrap_or(DEFAULT_STEP),
            discount_pct: cli.discount_pct.or(config.discount_pct).unwrap_or(0.0),
            output_weight,
            horizon: cli.horizon.or(config.horizon).unwrap_or(Horizon::Monthly),
            paygo_tier,
            paygo,
            schemes,
        })
    }

    /// Output weight for a PAYGO tier: explicit value, else the
    /// output/input price ratio floored at 1.
    pub fn output_weight_for(&self, paygo: &PaygoPricing) -> f64 {
        self.output_weight
            .unwrap_or_else(|| paygo.price_ratio().max(1.0))
    }
}

fn default_scheme_name(schemes: &[PricingScheme]) -> String {
    if schemes.iter().any(|s| s.name == DEFAULT_SCHEME) {
        DEFAULT_SCHEME.to_string()
    } else {
        schemes
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| DEFAULT_SCHEME.to_string())
    }
}

fn select_schemes(all: &[PricingScheme], wanted: &[String]) -> Result<Vec<PricingScheme>> {
    if wanted.iter().any(|w| w.eq_ignore_ascii_case("all")) {
        return Ok(all.to_vec());
    }
    let mut out = Vec::new();
    for name in wanted {
        let Some(s) = all.iter().find(|s| s.name.eq_ignore_ascii_case(name)) else {
            let known: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
            bail!("unknown scheme '{name}' (known: {})", known.join(", "));
        };
        out.push(s.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_config() {
        let s = Settings::resolve(Config::default(), &Overrides::default()).unwrap();
        assert_eq!(s.unit_tpm, 3000.0);
        assert_eq!((s.min_units, s.max_units, s.step), (15, 100, 5));
        assert_eq!(s.horizon, Horizon::Monthly);
        assert_eq!(s.paygo_tier, "default");
        assert_eq!(s.schemes.len(), 1);
        assert_eq!(s.schemes[0].name, "yearly-reservation");
        assert_eq!(s.schemes[0].unit_price, 221.0);
        // 8e-6 / 2e-6
        assert!((s.output_weight_for(&s.paygo["default"]) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn config_file_is_parsed() {
        let toml = r#"
unit_tpm = 1000
min_units = 1
max_units = 10
step = 1
discount_pct = 14.5
horizon = "annual"
paygo_tier = "gpt-4o"
default_scheme = "burst"

[paygo."gpt-4o"]
input_cost_per_token = 2.5e-6
output_cost_per_token = 1e-5

[[schemes]]
name = "burst"
unit_price = 2.0
period = "hour"

[[schemes]]
name = "steady"
unit_price = 2000.0
period = "year"
paygo_tier = "gpt-4o"
"#;
        let config = parse_config(toml).unwrap();
        let s = Settings::resolve(config, &Overrides::default()).unwrap();
        assert_eq!(s.unit_tpm, 1000.0);
        assert_eq!(s.discount_pct, 14.5);
        assert_eq!(s.horizon, Horizon::Annual);
        assert_eq!(s.paygo_tier, "gpt-4o");
        assert_eq!(s.schemes.len(), 1);
        assert_eq!(s.schemes[0].period, BillingPeriod::Hour);
        assert!(!s.paygo.contains_key("default"));
    }

    #[test]
    fn cli_overrides_config() {
        let config = parse_config("unit_tpm = 1000\nstep = 10\n").unwrap();
        let cli = Overrides {
            unit_tpm: Some(50.0),
            output_weight: Some(2.0),
            horizon: Some(Horizon::Observed),
            schemes: vec!["all".to_string()],
            ..Default::default()
        };
        let s = Settings::resolve(config, &cli).unwrap();
        assert_eq!(s.unit_tpm, 50.0);
        assert_eq!(s.step, 10);
        assert_eq!(s.horizon, Horizon::Observed);
        assert_eq!(s.schemes.len(), default_schemes().len());
        assert_eq!(s.output_weight_for(&default_paygo()), 2.0);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let cli = Overrides {
            schemes: vec!["weekly".to_string()],
            ..Default::default()
        };
        assert!(Settings::resolve(Config::default(), &cli).is_err());
    }

    #[test]
    fn explicit_weight_below_one_is_rejected() {
        let config = parse_config("output_weight = 0.5\n").unwrap();
        assert!(Settings::resolve(config, &Overrides::default()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("unit_tmp = 1000\n").is_err());
    }

    #[test]
    fn explicit_config_file_errors_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "min_units = \"many\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        std::fs::write(&path, "min_units = 20\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().min_units, Some(20));
    }

    #[test]
    fn cheap_output_is_floored_to_weight_one() {
        let s = Settings::resolve(Config::default(), &Overrides::default()).unwrap();
        let cheap_output = PaygoPricing {
            input_cost_per_token: 4e-6,
            output_cost_per_token: 1e-6,
        };
        assert_eq!(s.output_weight_for(&cheap_output), 1.0);
    }
}
