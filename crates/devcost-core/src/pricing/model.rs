//! Price table entries and cost results

use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "USD";

/// Days used to project a daily cost onto a month
pub const DAYS_PER_MONTH: f64 = 30.0;

const PER_MILLION: f64 = 1_000_000.0;

/// Rates of one model, in currency per million tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingModel {
    pub name: String,
    pub input_price: f64,
    pub output_price: f64,
    pub cache_read_price: f64,
    pub cache_write_price: f64,
    /// Fraction removed from every component for batch requests, in [0, 1]
    pub batch_discount: f64,
}

impl PricingModel {
    pub fn new(name: impl Into<String>, input_price: f64, output_price: f64) -> Self {
        Self {
            name: name.into(),
            input_price,
            output_price,
            cache_read_price: 0.0,
            cache_write_price: 0.0,
            batch_discount: 0.0,
        }
    }

    pub fn with_cache_prices(mut self, read: f64, write: f64) -> Self {
        self.cache_read_price = read;
        self.cache_write_price = write;
        self
    }

    pub fn with_batch_discount(mut self, discount: f64) -> Self {
        self.batch_discount = discount;
        self
    }

    /// Basic invariants: finite non-negative prices, discount in [0, 1]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (field, price) in self.prices() {
            if !price.is_finite() || price < 0.0 {
                problems.push(format!("{field} must be a non-negative number, got {price}"));
            }
        }
        if !(0.0..=1.0).contains(&self.batch_discount) {
            problems.push(format!(
                "batch_discount must be within [0, 1], got {}",
                self.batch_discount
            ));
        }
        problems
    }

    pub(crate) fn prices(&self) -> [(&'static str, f64); 4] {
        [
            ("input", self.input_price),
            ("output", self.output_price),
            ("cache_read", self.cache_read_price),
            ("cache_write", self.cache_write_price),
        ]
    }

    pub(crate) fn input_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / PER_MILLION * self.input_price
    }

    pub(crate) fn output_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / PER_MILLION * self.output_price
    }

    pub(crate) fn cache_costs(&self, read_tokens: u64, write_tokens: u64) -> CacheCosts {
        CacheCosts {
            read: read_tokens as f64 / PER_MILLION * self.cache_read_price,
            write: write_tokens as f64 / PER_MILLION * self.cache_write_price,
        }
    }
}

/// Cost of cache reads and writes (already included in the input cost)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheCosts {
    pub read: f64,
    pub write: f64,
}

impl CacheCosts {
    pub fn total(&self) -> f64 {
        self.read + self.write
    }

    fn scaled(self, factor: f64) -> Self {
        Self {
            read: self.read * factor,
            write: self.write * factor,
        }
    }
}

/// Priced usage; `total_cost == input_cost + output_cost`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostBreakdown {
    input_cost: f64,
    output_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_costs: Option<CacheCosts>,
    total_cost: f64,
    currency: String,
    model_name: String,
}

impl CostBreakdown {
    pub(crate) fn new(
        model_name: &str,
        input_cost: f64,
        output_cost: f64,
        cache_costs: Option<CacheCosts>,
    ) -> Self {
        Self {
            input_cost,
            output_cost,
            cache_costs,
            total_cost: input_cost + output_cost,
            currency: DEFAULT_CURRENCY.to_string(),
            model_name: model_name.to_string(),
        }
    }

    /// Copy with every component multiplied by `factor`
    pub(crate) fn scaled(&self, factor: f64) -> Self {
        Self::new(
            &self.model_name,
            self.input_cost * factor,
            self.output_cost * factor,
            self.cache_costs.map(|c| c.scaled(factor)),
        )
    }

    pub fn input_cost(&self) -> f64 {
        self.input_cost
    }

    pub fn output_cost(&self) -> f64 {
        self.output_cost
    }

    pub fn cache_costs(&self) -> Option<CacheCosts> {
        self.cache_costs
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Monthly projection of a daily token volume
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBudget {
    pub model_name: String,
    pub daily_tokens: u64,
    pub daily_cost: f64,
    pub monthly_cost: f64,
    pub currency: String,
}
