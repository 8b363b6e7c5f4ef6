//! Multi-model cost calculation
//!
//! The engine holds a name → [`PricingModel`] table, seeded with the
//! built-in tiers and replaced wholesale when a price table file is loaded.
//! Reads share a `parking_lot::RwLock`; a reload blocks readers only while
//! the new table is swapped in.
//!
//! # Pricing Formula
//!
//! ```text
//! Input cost  = (input / 1M) × input_price  [+ cache read + cache write]
//! Output cost = (output / 1M) × output_price
//! Batch       = every component × (1 − batch_discount)
//! ```
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use devcost_core::pricing::PricingEngine;
//! use devcost_core::resilience::ErrorRegistry;
//!
//! let engine = PricingEngine::new(Arc::new(ErrorRegistry::builtin()));
//! let cost = engine
//!     .calculate_basic_cost(1_000_000, 1_000_000, Some("claude-sonnet-4"))
//!     .unwrap();
//! assert_eq!(cost.total_cost(), 18.0); // $3 input + $15 output
//! ```

mod config;
mod embedded;
mod model;

pub use config::{ConfigFormat, ModelEntry, PricingConfig, ValidationRule};
pub use embedded::{builtin_models, DEFAULT_MODEL};
pub use model::{
    CacheCosts, CostBreakdown, MonthlyBudget, PricingModel, DAYS_PER_MONTH, DEFAULT_CURRENCY,
};

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{LoadError, LoadReport};
use crate::resilience::{AppError, AppResult, ErrorCode, ErrorRegistry};

#[derive(Debug, Clone)]
struct PriceTable {
    models: BTreeMap<String, PricingModel>,
    default_model: String,
}

/// Outcome of [`PricingEngine::load_from_config`]
#[derive(Debug, Clone, Serialize)]
pub struct PricingLoadReport {
    pub path: PathBuf,
    pub file_found: bool,
    /// Whether the table was replaced
    pub applied: bool,
    pub loaded_models: Vec<String>,
    pub default_model: String,
    pub report: LoadReport,
}

pub struct PricingEngine {
    table: RwLock<PriceTable>,
    registry: Arc<ErrorRegistry>,
}

impl PricingEngine {
    /// Engine seeded with the built-in tiers
    pub fn new(registry: Arc<ErrorRegistry>) -> Self {
        Self {
            table: RwLock::new(PriceTable {
                models: builtin_models(),
                default_model: DEFAULT_MODEL.to_string(),
            }),
            registry,
        }
    }

    /// Engine with a custom table
    pub fn with_models(
        models: Vec<PricingModel>,
        default_model: Option<&str>,
        registry: Arc<ErrorRegistry>,
    ) -> AppResult<Self> {
        let engine = Self::new(registry);
        engine.replace_table(models, default_model)?;
        Ok(engine)
    }

    /// Replace the table from a price table file
    ///
    /// Invalid entries are skipped and reported. A missing file, or a file
    /// without a single valid entry, leaves the table unchanged; a file that
    /// cannot be read or parsed fails with `CONFIG_LOAD_FAILED`.
    pub fn load_from_config(&self, path: &Path) -> AppResult<PricingLoadReport> {
        let source = path.display().to_string();
        let mut report = LoadReport::new();

        if !path.exists() {
            warn!(path = %source, "Price table not found, keeping current prices");
            report.add_error(
                LoadError::warning(&source, "Price table file not found")
                    .with_suggestion(format!("Check if file exists: ls {source}")),
            );
            return Ok(self.load_report(path, false, false, Vec::new(), report));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            self.registry
                .create(ErrorCode::ConfigLoadFailed, format!("cannot read {source}"))
                .with_component("pricing")
                .with_operation("load_from_config")
                .with_parameter("path", source.clone())
                .with_cause(AppError::from(e))
        })?;

        let config = PricingConfig::parse(&content, ConfigFormat::from_path(path), &self.registry)
            .map_err(|e| e.with_parameter("path", source.clone()))?;

        let (accepted, rejected) = config.validated_models();
        for (name, problems) in &rejected {
            warn!(model = %name, problems = ?problems, "Skipping invalid price table entry");
            report.add_warning(&source, format!("model '{name}' skipped: {}", problems.join("; ")));
        }
        report.skipped = rejected.len();

        if accepted.is_empty() {
            warn!(path = %source, "Price table has no valid models, keeping current prices");
            report.add_fatal(&source, "no valid models in price table");
            return Ok(self.load_report(path, true, false, Vec::new(), report));
        }

        let default_model = {
            let current = self.table.read().default_model.clone();
            match config.default_model {
                Some(name) if accepted.contains_key(&name) => name,
                requested => {
                    if let Some(name) = requested {
                        report.add_warning(
                            &source,
                            format!("default model '{name}' is not a valid entry"),
                        );
                    }
                    if accepted.contains_key(&current) {
                        current
                    } else {
                        // accepted is non-empty here
                        accepted.keys().next().cloned().unwrap_or(current)
                    }
                }
            }
        };

        let loaded: Vec<String> = accepted.keys().cloned().collect();
        report.loaded = loaded.len();
        {
            let mut table = self.table.write();
            table.models = accepted;
            table.default_model = default_model;
        }

        info!(
            path = %source,
            models = report.loaded,
            skipped = report.skipped,
            "Loaded price table"
        );
        Ok(self.load_report(path, true, true, loaded, report))
    }

    /// Replace the table programmatically
    ///
    /// The whole call is rejected with `CONFIG_INVALID` when any model is
    /// invalid, the list is empty or the default is not part of it.
    pub fn replace_table(&self, models: Vec<PricingModel>, default_model: Option<&str>) -> AppResult<()> {
        if models.is_empty() {
            return Err(self.config_invalid("price table must contain at least one model"));
        }
        for model in &models {
            let problems = model.validate();
            if !problems.is_empty() {
                return Err(self
                    .config_invalid(format!("model '{}': {}", model.name, problems.join("; ")))
                    .with_parameter("model", model.name.clone()));
            }
        }

        let models: BTreeMap<String, PricingModel> =
            models.into_iter().map(|m| (m.name.clone(), m)).collect();

        let mut table = self.table.write();
        let default_model = match default_model {
            Some(name) if models.contains_key(name) => name.to_string(),
            Some(name) => {
                return Err(self
                    .config_invalid(format!("default model '{name}' is not in the table"))
                    .with_parameter("model", name))
            }
            None if models.contains_key(&table.default_model) => table.default_model.clone(),
            None => models.keys().next().cloned().unwrap_or_default(),
        };

        debug!(models = models.len(), default = %default_model, "Replaced price table");
        *table = PriceTable {
            models,
            default_model,
        };
        Ok(())
    }

    pub fn models(&self) -> Vec<PricingModel> {
        self.table.read().models.values().cloned().collect()
    }

    pub fn model(&self, name: &str) -> Option<PricingModel> {
        self.table.read().models.get(name).cloned()
    }

    pub fn default_model(&self) -> String {
        self.table.read().default_model.clone()
    }

    pub fn set_default_model(&self, name: &str) -> AppResult<()> {
        let mut table = self.table.write();
        if !table.models.contains_key(name) {
            return Err(self.unknown_model(name, "set_default_model"));
        }
        table.default_model = name.to_string();
        Ok(())
    }

    /// input/1M × input price + output/1M × output price
    pub fn calculate_basic_cost(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        model: Option<&str>,
    ) -> AppResult<CostBreakdown> {
        const OP: &str = "calculate_basic_cost";
        let input = self.token_count("input_tokens", input_tokens, OP)?;
        let output = self.token_count("output_tokens", output_tokens, OP)?;
        let pricing = self.resolve(model, OP)?;

        Ok(price(&pricing, input, output, None, false))
    }

    /// Basic cost plus cache reads/writes at their own rates
    ///
    /// Cache costs are folded into the input component and also reported
    /// separately.
    pub fn calculate_cost_with_cache(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        cache_read_tokens: i64,
        cache_write_tokens: i64,
        model: Option<&str>,
    ) -> AppResult<CostBreakdown> {
        self.calculate_cost_with_cache_and_batch(
            input_tokens,
            output_tokens,
            cache_read_tokens,
            cache_write_tokens,
            model,
            false,
        )
    }

    /// Cache pricing with the batch discount applied on top when `use_batch`
    ///
    /// Rates and discount come from the same table snapshot.
    pub fn calculate_cost_with_cache_and_batch(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        cache_read_tokens: i64,
        cache_write_tokens: i64,
        model: Option<&str>,
        use_batch: bool,
    ) -> AppResult<CostBreakdown> {
        const OP: &str = "calculate_cost_with_cache";
        let input = self.token_count("input_tokens", input_tokens, OP)?;
        let output = self.token_count("output_tokens", output_tokens, OP)?;
        let cache_read = self.token_count("cache_read_tokens", cache_read_tokens, OP)?;
        let cache_write = self.token_count("cache_write_tokens", cache_write_tokens, OP)?;
        let pricing = self.resolve(model, OP)?;

        Ok(price(&pricing, input, output, Some((cache_read, cache_write)), use_batch))
    }

    /// Basic cost, discounted by the model's batch discount when `use_batch`
    pub fn calculate_cost_with_batch_discount(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        model: Option<&str>,
        use_batch: bool,
    ) -> AppResult<CostBreakdown> {
        const OP: &str = "calculate_cost_with_batch_discount";
        let input = self.token_count("input_tokens", input_tokens, OP)?;
        let output = self.token_count("output_tokens", output_tokens, OP)?;
        let pricing = self.resolve(model, OP)?;

        Ok(price(&pricing, input, output, None, use_batch))
    }

    /// Daily volume split evenly between input and output, projected over
    /// [`DAYS_PER_MONTH`] days
    pub fn estimate_monthly_budget(&self, daily_tokens: i64, model: Option<&str>) -> AppResult<MonthlyBudget> {
        let daily = self.token_count("daily_tokens", daily_tokens, "estimate_monthly_budget")?;
        let input = daily / 2;
        let output = daily - input;
        let cost = self.calculate_basic_cost(input as i64, output as i64, model)?;

        Ok(MonthlyBudget {
            model_name: cost.model_name().to_string(),
            daily_tokens: daily,
            daily_cost: cost.total_cost(),
            monthly_cost: cost.total_cost() * DAYS_PER_MONTH,
            currency: cost.currency().to_string(),
        })
    }

    /// Basic cost under every registered model, ordered by model name
    pub fn compare_pricing_models(&self, input_tokens: i64, output_tokens: i64) -> AppResult<Vec<CostBreakdown>> {
        const OP: &str = "compare_pricing_models";
        let input = self.token_count("input_tokens", input_tokens, OP)?;
        let output = self.token_count("output_tokens", output_tokens, OP)?;

        let table = self.table.read();
        Ok(table
            .models
            .values()
            .map(|pricing| price(pricing, input, output, None, false))
            .collect())
    }

    fn resolve(&self, model: Option<&str>, operation: &str) -> AppResult<PricingModel> {
        let table = self.table.read();
        let name = model.unwrap_or(&table.default_model);
        table
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown_model(name, operation))
    }

    fn token_count(&self, field: &str, value: i64, operation: &str) -> AppResult<u64> {
        u64::try_from(value).map_err(|_| {
            self.registry
                .create(
                    ErrorCode::CostInvalidTokenCount,
                    format!("{field} must not be negative, got {value}"),
                )
                .with_component("pricing")
                .with_operation(operation)
                .with_parameter(field, value)
        })
    }

    fn unknown_model(&self, name: &str, operation: &str) -> AppError {
        self.registry
            .create(ErrorCode::CostInvalidPricingModel, name)
            .with_component("pricing")
            .with_operation(operation)
            .with_parameter("model", name)
    }

    fn config_invalid(&self, detail: impl Into<String>) -> AppError {
        self.registry
            .create(ErrorCode::ConfigInvalid, detail)
            .with_component("pricing")
            .with_operation("replace_table")
    }

    fn load_report(
        &self,
        path: &Path,
        file_found: bool,
        applied: bool,
        loaded_models: Vec<String>,
        report: LoadReport,
    ) -> PricingLoadReport {
        PricingLoadReport {
            path: path.to_path_buf(),
            file_found,
            applied,
            loaded_models,
            default_model: self.default_model(),
            report,
        }
    }
}

impl std::fmt::Debug for PricingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read();
        f.debug_struct("PricingEngine")
            .field("models", &table.models.keys().collect::<Vec<_>>())
            .field("default_model", &table.default_model)
            .finish()
    }
}

/// Price usage under one model snapshot; cache pools fold into the input
/// component and the batch discount scales every component
fn price(
    pricing: &PricingModel,
    input: u64,
    output: u64,
    cache: Option<(u64, u64)>,
    use_batch: bool,
) -> CostBreakdown {
    let breakdown = match cache {
        Some((read, write)) => {
            let cache = pricing.cache_costs(read, write);
            CostBreakdown::new(
                &pricing.name,
                pricing.input_cost(input) + cache.total(),
                pricing.output_cost(output),
                Some(cache),
            )
        }
        None => CostBreakdown::new(
            &pricing.name,
            pricing.input_cost(input),
            pricing.output_cost(output),
            None,
        ),
    };

    if use_batch {
        breakdown.scaled(1.0 - pricing.batch_discount)
    } else {
        breakdown
    }
}
