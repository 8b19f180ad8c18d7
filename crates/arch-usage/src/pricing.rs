use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-million-token rates for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rates {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

pub type PricingTable = HashMap<String, Rates>;

/// Model used for cost calculation when the agent's own model id carries no
/// pricing entry.
pub const FALLBACK_MODEL: &str = "claude-sonnet-4-6";

/// Built-in rates, used whenever no `pricing.yaml` is configured or it fails
/// to load. Kept in sync with whatever ships in the default table so a bare
/// install still produces sane cost figures.
pub fn default_pricing() -> PricingTable {
    let mut table = HashMap::new();
    table.insert(
        "claude-opus-4-5".to_string(),
        Rates { input: 15.00, output: 75.00, cache_read: 1.50, cache_write: 18.75 },
    );
    table.insert(
        "claude-opus-4-6".to_string(),
        Rates { input: 15.00, output: 75.00, cache_read: 1.50, cache_write: 18.75 },
    );
    table.insert(
        "claude-sonnet-4-5".to_string(),
        Rates { input: 3.00, output: 15.00, cache_read: 0.30, cache_write: 3.75 },
    );
    table.insert(
        "claude-sonnet-4-6".to_string(),
        Rates { input: 3.00, output: 15.00, cache_read: 0.30, cache_write: 3.75 },
    );
    table.insert(
        "claude-haiku-4-5".to_string(),
        Rates { input: 0.80, output: 4.00, cache_read: 0.08, cache_write: 1.00 },
    );
    table
}

/// Load a rate table from `path`, falling back to [`default_pricing`] if the
/// path is absent or fails to parse.
pub fn load_pricing(path: Option<&Path>) -> PricingTable {
    let Some(path) = path else {
        return default_pricing();
    };
    if !path.exists() {
        return default_pricing();
    }

    match std::fs::read_to_string(path) {
        Ok(text) => match serde_yaml::from_str::<PricingTable>(&text) {
            Ok(table) => table,
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid pricing file, using defaults");
                default_pricing()
            }
        },
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read pricing file, using defaults");
            default_pricing()
        }
    }
}

/// Cost in USD for one turn's token counts under `model`, rounded to six
/// decimal places to keep floating-point noise out of running totals.
pub fn calculate_cost(
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_creation_tokens: u64,
    model: &str,
    pricing: &PricingTable,
) -> f64 {
    let rates = pricing.get(model).or_else(|| {
        warn!(model, fallback = FALLBACK_MODEL, "unknown model, using fallback pricing");
        pricing.get(FALLBACK_MODEL)
    });

    let Some(rates) = rates else {
        warn!(model, "no pricing available for model");
        return 0.0;
    };

    let cost = (input_tokens as f64 / 1_000_000.0) * rates.input
        + (output_tokens as f64 / 1_000_000.0) * rates.output
        + (cache_read_tokens as f64 / 1_000_000.0) * rates.cache_read
        + (cache_creation_tokens as f64 / 1_000_000.0) * rates.cache_write;

    (cost * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_own_rates() {
        let pricing = default_pricing();
        let cost = calculate_cost(1_000_000, 0, 0, 0, "claude-sonnet-4-6", &pricing);
        assert_eq!(cost, 3.00);
    }

    #[test]
    fn unknown_model_falls_back() {
        let pricing = default_pricing();
        let cost = calculate_cost(1_000_000, 0, 0, 0, "claude-made-up", &pricing);
        assert_eq!(cost, 3.00);
    }

    #[test]
    fn empty_pricing_table_yields_zero() {
        let cost = calculate_cost(1_000_000, 1_000_000, 0, 0, "anything", &HashMap::new());
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn missing_pricing_file_falls_back_to_defaults() {
        let table = load_pricing(Some(Path::new("/nonexistent/pricing.yaml")));
        assert!(table.contains_key(FALLBACK_MODEL));
    }
}
