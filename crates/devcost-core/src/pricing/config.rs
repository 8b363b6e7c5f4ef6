//! Price table files
//!
//! A price table is TOML, YAML or JSON (picked by file extension):
//!
//! ```toml
//! default_model = "claude-sonnet-4"
//!
//! [models.claude-sonnet-4]
//! input = 3.0
//! output = 15.0
//! cache_read = 0.3
//! cache_write = 3.75
//! batch_discount = 0.5
//!
//! [validation.claude-sonnet-4]
//! min_price = 0.0
//! max_price = 100.0
//! require_cache = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::model::PricingModel;
use crate::resilience::{AppResult, ErrorCause, ErrorCode, ErrorRegistry};

/// One `[models.<name>]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_discount: Option<f64>,
}

impl ModelEntry {
    pub fn to_model(&self, name: &str) -> PricingModel {
        PricingModel::new(name, self.input, self.output)
            .with_cache_prices(
                self.cache_read.unwrap_or(0.0),
                self.cache_write.unwrap_or(0.0),
            )
            .with_batch_discount(self.batch_discount.unwrap_or(0.0))
    }
}

/// Optional per-model rules (`[validation.<name>]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRule {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub require_cache: bool,
    pub require_batch: bool,
}

impl ValidationRule {
    /// Problems `entry` has under this rule
    pub fn check(&self, entry: &ModelEntry) -> Vec<String> {
        let mut problems = Vec::new();
        let prices = [
            ("input", Some(entry.input)),
            ("output", Some(entry.output)),
            ("cache_read", entry.cache_read),
            ("cache_write", entry.cache_write),
        ];

        for (field, price) in prices {
            let Some(price) = price else { continue };
            if let Some(min) = self.min_price {
                if price < min {
                    problems.push(format!("{field} price {price} is below the minimum {min}"));
                }
            }
            if let Some(max) = self.max_price {
                if price > max {
                    problems.push(format!("{field} price {price} is above the maximum {max}"));
                }
            }
        }

        if self.require_cache && (entry.cache_read.is_none() || entry.cache_write.is_none()) {
            problems.push("cache_read and cache_write prices are required".to_string());
        }
        if self.require_batch && entry.batch_discount.is_none() {
            problems.push("batch_discount is required".to_string());
        }
        problems
    }
}

/// Parsed price table file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation: BTreeMap<String, ValidationRule>,
}

/// Serialization format of a price table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Format implied by the file extension (TOML when unknown)
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl PricingConfig {
    /// Parse `content` in the given format
    ///
    /// Fails with `CONFIG_LOAD_FAILED` when the content does not parse.
    pub fn parse(content: &str, format: ConfigFormat, registry: &ErrorRegistry) -> AppResult<Self> {
        let parsed: Result<PricingConfig, ErrorCause> = match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| ErrorCause::external(&e)),
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| ErrorCause::external(&e))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ErrorCause::external(&e))
            }
        };

        parsed.map_err(|cause| {
            let detail = match &cause {
                ErrorCause::External { message, .. } => message.clone(),
                ErrorCause::App(inner) => inner.message().to_string(),
            };
            registry
                .create(ErrorCode::ConfigLoadFailed, format!("invalid price table: {detail}"))
                .with_component("pricing")
                .with_operation("parse_price_table")
                .with_parameter("format", format!("{format:?}").to_lowercase())
                .with_cause(cause)
        })
    }

    /// Validated models and, per rejected model, the problems found
    pub fn validated_models(&self) -> (BTreeMap<String, PricingModel>, Vec<(String, Vec<String>)>) {
        let mut accepted = BTreeMap::new();
        let mut rejected = Vec::new();

        for (name, entry) in &self.models {
            let model = entry.to_model(name);
            let mut problems = model.validate();
            if let Some(rule) = self.validation.get(name) {
                problems.extend(rule.check(entry));
            }

            if problems.is_empty() {
                accepted.insert(name.clone(), model);
            } else {
                rejected.push((name.clone(), problems));
            }
        }

        (accepted, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TOML_TABLE: &str = r#"
default_model = "fast"

[models.fast]
input = 0.5
output = 2.0

[models.smart]
input = 10.0
output = 40.0
cache_read = 1.0
cache_write = 12.5
batch_discount = 0.5

[validation.fast]
require_cache = true
"#;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(&PathBuf::from("p.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(&PathBuf::from("p.YML")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(&PathBuf::from("p.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(&PathBuf::from("p.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(&PathBuf::from("pricing")), ConfigFormat::Toml);
    }

    #[test]
    fn test_parse_toml_and_validate() {
        let config = PricingConfig::parse(TOML_TABLE, ConfigFormat::Toml, &ErrorRegistry::builtin())
            .unwrap();
        assert_eq!(config.default_model.as_deref(), Some("fast"));

        let (accepted, rejected) = config.validated_models();
        assert_eq!(accepted.keys().collect::<Vec<_>>(), ["smart"]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "fast");
        assert!(rejected[0].1[0].contains("cache_read"));
        assert_eq!(accepted["smart"].cache_write_price, 12.5);
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let registry = ErrorRegistry::builtin();
        let yaml = "models:\n  m:\n    input: 1.0\n    output: 2.0\n";
        let json = r#"{"models": {"m": {"input": 1.0, "output": 2.0}}}"#;

        let from_yaml = PricingConfig::parse(yaml, ConfigFormat::Yaml, &registry).unwrap();
        let from_json = PricingConfig::parse(json, ConfigFormat::Json, &registry).unwrap();
        assert_eq!(from_yaml, from_json);
        assert_eq!(from_yaml.models["m"].output, 2.0);
    }

    #[test]
    fn test_parse_failure_is_config_load_failed() {
        let err = PricingConfig::parse("models = [", ConfigFormat::Toml, &ErrorRegistry::builtin())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigLoadFailed);
        assert_eq!(err.context().parameters["format"], "toml");
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_validation_rule_bounds() {
        let rule = ValidationRule {
            min_price: Some(1.0),
            max_price: Some(20.0),
            require_batch: true,
            ..Default::default()
        };
        let entry = ModelEntry {
            input: 0.5,
            output: 25.0,
            cache_read: None,
            cache_write: None,
            batch_discount: None,
        };
        assert_eq!(rule.check(&entry).len(), 3);
    }

    #[test]
    fn test_negative_prices_are_rejected() {
        let config = PricingConfig {
            models: BTreeMap::from([(
                "bad".to_string(),
                ModelEntry {
                    input: -1.0,
                    output: 1.0,
                    cache_read: None,
                    cache_write: None,
                    batch_discount: Some(2.0),
                },
            )]),
            ..Default::default()
        };
        let (accepted, rejected) = config.validated_models();
        assert!(accepted.is_empty());
        assert_eq!(rejected[0].1.len(), 2);
    }
}
