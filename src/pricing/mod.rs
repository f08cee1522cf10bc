mod litellm;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use tracing::{debug, info, warn};

use crate::cost::{PaygoPricing, PricingMap};

const MAX_PRICE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-token prices of every model in the LiteLLM list, keyed by model name.
pub struct ModelPrices {
    by_model: HashMap<String, PaygoPricing>,
}

impl PricingMap for ModelPrices {
    fn get(&self, model: &str) -> Option<&PaygoPricing> {
        self.by_model.get(model)
    }
}

fn price_cache_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ptusim").map(|d| d.cache_dir().join("litellm_prices.json"))
}

fn age_of(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn read_cached(path: &Path) -> Option<ModelPrices> {
    let data = fs::read_to_string(path).ok()?;
    let by_model = litellm::parse_litellm_json(&data).ok()?;
    Some(ModelPrices { by_model })
}

fn write_cached(path: &Path, data: &str) {
    let written = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| fs::write(path, data));
    if let Err(e) = written {
        warn!("failed to cache model prices at {}: {e}", path.display());
    }
}

/// Model prices from the local copy while it is younger than a day (any
/// age with `offline`), otherwise freshly downloaded.
pub fn load_pricing(offline: bool) -> Result<ModelPrices> {
    let cache_file = price_cache_file();

    if let Some(path) = cache_file.as_deref() {
        let fresh = age_of(path).is_some_and(|age| age < MAX_PRICE_AGE);
        if offline || fresh {
            if let Some(prices) = read_cached(path) {
                debug!(path = %path.display(), "using cached model prices");
                return Ok(prices);
            }
        }
    }
    if offline {
        bail!("--offline given but no usable model price cache exists");
    }

    info!("fetching model prices from LiteLLM");
    let data = litellm::fetch_litellm_json().context("cannot download model prices")?;
    let by_model = litellm::parse_litellm_json(&data).context("cannot parse model prices")?;
    if let Some(path) = cache_file.as_deref() {
        write_cached(path, &data);
    }
    Ok(ModelPrices { by_model })
}

/// PAYGO tiers from config, plus `model` looked up in the LiteLLM price
/// list when the config doesn't define a tier of that name.
pub fn paygo_tiers(
    configured: &BTreeMap<String, PaygoPricing>,
    model: Option<&str>,
    offline: bool,
) -> Result<BTreeMap<String, PaygoPricing>> {
    let mut tiers = configured.clone();
    let Some(model) = model else {
        return Ok(tiers);
    };
    if tiers.contains_key(model) {
        return Ok(tiers);
    }

    let remote = load_pricing(offline)?;
    let Some(pricing) = remote.get(model) else {
        bail!("no PAYGO pricing known for model '{model}'");
    };
    info!(
        model,
        input = pricing.input_cost_per_token,
        output = pricing.output_cost_per_token,
        "using LiteLLM prices"
    );
    tiers.insert(model.to_string(), pricing.clone());
    Ok(tiers)
}

/// Names to try in the price list for a model key such as
/// "GPT-4o (2024-11-20)": the key itself, then the bare model name.
fn lookup_names(model: &str) -> Vec<String> {
    let base = model.split(" (").next().unwrap_or(model).trim();
    let mut names = vec![model.to_string(), base.to_string(), base.to_lowercase()];
    names.dedup();
    names
}

/// Add a tier named after each model that `prices` knows and `tiers`
/// doesn't define yet. Returns the models left without a price.
fn add_model_tiers(
    tiers: &mut BTreeMap<String, PaygoPricing>,
    models: &[String],
    prices: &dyn PricingMap,
) -> Vec<String> {
    let mut unpriced = Vec::new();
    for model in models {
        if tiers.contains_key(model) {
            continue;
        }
        match lookup_names(model).iter().find_map(|name| prices.get(name)) {
            Some(pricing) => {
                debug!(model = %model, "priced from LiteLLM");
                tiers.insert(model.clone(), pricing.clone());
            }
            None => unpriced.push(model.clone()),
        }
    }
    unpriced
}

/// Configured tiers plus one tier per model in `models` that the LiteLLM
/// price list covers. A price list that can't be loaded only warns;
/// unpriced models fall back to the default tier later.
pub fn model_tiers(
    configured: &BTreeMap<String, PaygoPricing>,
    models: &[String],
    offline: bool,
) -> BTreeMap<String, PaygoPricing> {
    let mut tiers = configured.clone();
    if models.iter().all(|m| tiers.contains_key(m)) {
        return tiers;
    }
    match load_pricing(offline) {
        Ok(prices) => {
            let unpriced = add_model_tiers(&mut tiers, models, &prices);
            if !unpriced.is_empty() {
                warn!("no PAYGO price known for: {}", unpriced.join(", "));
            }
        }
        Err(e) => warn!("model prices unavailable, using the default tier: {e:#}"),
    }
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(input: f64, output: f64) -> PaygoPricing {
        PaygoPricing {
            input_cost_per_token: input,
            output_cost_per_token: output,
        }
    }

    #[test]
    fn models_are_priced_by_bare_name() {
        let mut list = BTreeMap::new();
        list.insert("gpt-4o".to_string(), pricing(2.5e-6, 1e-5));
        list.insert("gpt-4o-mini".to_string(), pricing(1.5e-7, 6e-7));

        let mut tiers = BTreeMap::new();
        tiers.insert("my-deployment".to_string(), pricing(1e-6, 1e-6));
        let models = vec![
            "GPT-4o (2024-11-20)".to_string(),
            "gpt-4o-mini".to_string(),
            "my-deployment".to_string(),
            "custom-thing".to_string(),
        ];
        let unpriced = add_model_tiers(&mut tiers, &models, &list);

        assert_eq!(unpriced, vec!["custom-thing"]);
        assert_eq!(tiers["GPT-4o (2024-11-20)"], pricing(2.5e-6, 1e-5));
        assert_eq!(tiers["gpt-4o-mini"], pricing(1.5e-7, 6e-7));
        // configured tiers win
        assert_eq!(tiers["my-deployment"], pricing(1e-6, 1e-6));
    }

    #[test]
    fn lookup_names_strip_version() {
        assert_eq!(lookup_names("GPT-4o (2024-11-20)"), vec!["GPT-4o (2024-11-20)", "GPT-4o", "gpt-4o"]);
        assert_eq!(lookup_names("gpt-4o"), vec!["gpt-4o"]);
    }

    #[test]
    fn configured_model_needs_no_lookup() {
        let mut configured = BTreeMap::new();
        configured.insert(
            "gpt-4.1".to_string(),
            PaygoPricing {
                input_cost_per_token: 2e-6,
                output_cost_per_token: 8e-6,
            },
        );
        // Offline with no cache would fail if a lookup were attempted
        let tiers = paygo_tiers(&configured, Some("gpt-4.1"), true).unwrap();
        assert_eq!(tiers.len(), 1);

        let tiers = paygo_tiers(&configured, None, true).unwrap();
        assert_eq!(tiers, configured);
    }
}
