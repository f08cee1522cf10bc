use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::cost::PaygoPricing;

const LITELLM_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

pub fn fetch_litellm_json() -> Result<String> {
    let body = ureq::get(LITELLM_URL).call()?.body_mut().read_to_string()?;
    Ok(body)
}

pub fn parse_litellm_json(data: &str) -> Result<HashMap<String, PaygoPricing>> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(data)?;
    let mut map = HashMap::new();

    for (key, val) in &raw {
        let Some(input) = val.get("input_cost_per_token").and_then(|v| v.as_f64()) else {
            continue;
        };
        let Some(output) = val.get("output_cost_per_token").and_then(|v| v.as_f64()) else {
            continue;
        };

        let pricing = PaygoPricing {
            input_cost_per_token: input,
            output_cost_per_token: output,
        };

        map.insert(key.clone(), pricing.clone());

        // Bare model names ("gpt-4.1") resolve to the first provider-prefixed entry in key order
        let bare = strip_provider_prefix(key);
        if bare != key {
            map.entry(bare.to_string()).or_insert(pricing);
        }
    }

    Ok(map)
}

/// "azure/gpt-4.1" → "gpt-4.1", "azure/eu/gpt-4o" → "gpt-4o"
fn strip_provider_prefix(key: &str) -> &str {
    let prefixes = ["azure_ai/", "azure/", "openai/"];

    for prefix in prefixes {
        if let Some(rest) = key.strip_prefix(prefix) {
            // Regional deployments: "azure/eu/gpt-4o", "azure/global/gpt-4o"
            return match rest.split_once('/') {
                Some((_, model)) => model,
                None => rest,
            };
        }
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_priced_entries_only() {
        let data = r#"{
            "gpt-4.1": {"input_cost_per_token": 2e-6, "output_cost_per_token": 8e-6},
            "text-embedding-3-small": {"input_cost_per_token": 2e-8},
            "sample_spec": {"max_tokens": "set to max"}
        }"#;
        let map = parse_litellm_json(data).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["gpt-4.1"].output_cost_per_token, 8e-6);
    }

    #[test]
    fn provider_prefixes_are_stripped() {
        assert_eq!(strip_provider_prefix("azure/gpt-4o"), "gpt-4o");
        assert_eq!(strip_provider_prefix("azure/eu/gpt-4o"), "gpt-4o");
        assert_eq!(strip_provider_prefix("azure_ai/gpt-4.1"), "gpt-4.1");
        assert_eq!(strip_provider_prefix("gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn plain_key_wins_over_prefixed_alias() {
        let data = r#"{
            "gpt-4o": {"input_cost_per_token": 2.5e-6, "output_cost_per_token": 1e-5},
            "azure/gpt-4o": {"input_cost_per_token": 9e-6, "output_cost_per_token": 9e-6}
        }"#;
        let map = parse_litellm_json(data).unwrap();
        assert_eq!(map["gpt-4o"].input_cost_per_token, 2.5e-6);
        assert_eq!(map["azure/gpt-4o"].input_cost_per_token, 9e-6);
    }
}
