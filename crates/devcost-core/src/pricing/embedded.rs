//! Built-in price table
//!
//! Example tiers used until a price table file is loaded. Prices are per
//! million tokens; cache reads cost 10% and cache writes 125% of the input
//! rate.

use std::collections::BTreeMap;

use super::model::PricingModel;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

/// Built-in models keyed by name
pub fn builtin_models() -> BTreeMap<String, PricingModel> {
    [
        PricingModel::new("claude-opus-4", 15.0, 75.0)
            .with_cache_prices(1.5, 18.75)
            .with_batch_discount(0.5),
        PricingModel::new("claude-sonnet-4", 3.0, 15.0)
            .with_cache_prices(0.3, 3.75)
            .with_batch_discount(0.5),
        PricingModel::new("claude-haiku-3-5", 0.8, 4.0)
            .with_cache_prices(0.08, 1.0)
            .with_batch_discount(0.4),
    ]
    .into_iter()
    .map(|model| (model.name.clone(), model))
    .collect()
}
