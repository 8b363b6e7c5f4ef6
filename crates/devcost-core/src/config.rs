//! Settings for devcost
//!
//! Read from `<config_dir>/devcost/config.toml`. A missing file yields the
//! defaults; every section and field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::resilience::{
    AppResult, CircuitBreakerConfig, ErrorCause, ErrorCode, ErrorRegistry, RetryPolicy,
};
use crate::tokens::TokenizerConfig;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tokens: TokenizerConfig,
    pub pricing: PricingSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: BreakerSettings,
}

/// `[pricing]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Price table file; relative paths resolve against the config directory
    pub path: Option<PathBuf>,
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_factor(self.backoff_factor)
            .with_jitter(self.jitter)
    }
}

/// `[circuit_breaker]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_recovery_timeout(Duration::from_millis(self.recovery_timeout_ms))
    }
}

impl Settings {
    /// `<config_dir>/devcost`, if the platform has a config directory
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("devcost"))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`; a missing file yields the defaults
    ///
    /// Fails with `CONFIG_LOAD_FAILED` when the file cannot be read or
    /// parsed, and with `CONFIG_INVALID` when values are out of range.
    pub fn load(path: &Path, registry: &ErrorRegistry) -> AppResult<Self> {
        let source = path.display().to_string();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %source, "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(registry
                    .create(ErrorCode::ConfigLoadFailed, format!("cannot read {source}"))
                    .with_component("config")
                    .with_operation("load")
                    .with_parameter("path", source)
                    .with_cause(ErrorCause::external(&e)))
            }
        };

        let settings: Settings = toml::from_str(&content).map_err(|e| {
            registry
                .create(ErrorCode::ConfigLoadFailed, format!("invalid TOML in {source}"))
                .with_component("config")
                .with_operation("load")
                .with_parameter("path", source.clone())
                .with_cause(ErrorCause::external(&e))
        })?;

        let problems = settings.validate();
        if !problems.is_empty() {
            return Err(registry
                .create(ErrorCode::ConfigInvalid, problems.join("; "))
                .with_component("config")
                .with_operation("load")
                .with_parameter("path", source));
        }

        debug!(path = %source, "Loaded config");
        Ok(settings)
    }

    /// Persist settings as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems: Vec<String> = self
            .tokens
            .validate()
            .into_iter()
            .map(|p| format!("tokens.{p}"))
            .collect();
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 1.0) {
            problems.push(format!(
                "retry.backoff_factor must be at least 1.0, got {}",
                self.retry.backoff_factor
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            problems.push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            problems.push("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        problems
    }

    /// Price table path, resolved against `base_dir` when relative
    pub fn pricing_path(&self, base_dir: Option<&Path>) -> Option<PathBuf> {
        let path = self.pricing.path.as_ref()?;
        match base_dir {
            Some(base) if path.is_relative() => Some(base.join(path)),
            _ => Some(path.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::CalculationMethod;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings =
            Settings::load(&dir.path().join("config.toml"), &ErrorRegistry::builtin()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.tokens.max_text_length, 1_000_000);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[tokens]
preferred_method = "estimation"
english_chars_per_token = 3.5

[pricing]
path = "prices.yaml"

[circuit_breaker]
recovery_timeout_ms = 5000
"#,
        )
        .unwrap();

        let settings = Settings::load(&path, &ErrorRegistry::builtin()).unwrap();
        assert_eq!(settings.tokens.preferred_method, CalculationMethod::Estimation);
        assert_eq!(settings.tokens.english_chars_per_token, 3.5);
        assert_eq!(settings.tokens.chinese_chars_per_token, 1.5);
        assert_eq!(settings.retry, RetrySettings::default());
        assert_eq!(
            settings.circuit_breaker.to_config().recovery_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            settings.pricing_path(Some(dir.path())),
            Some(dir.path().join("prices.yaml"))
        );
    }

    #[test]
    fn test_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tokens\ncache_size = ").unwrap();
        let err = Settings::load(&path, &ErrorRegistry::builtin()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigLoadFailed);
    }

    #[test]
    fn test_out_of_range_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[tokens]\nchinese_chars_per_token = 0.0\n[retry]\nbackoff_factor = 0.5\n",
        )
        .unwrap();
        let err = Settings::load(&path, &ErrorRegistry::builtin()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        assert!(err.message().contains("tokens.chinese_chars_per_token"));
        assert!(err.message().contains("backoff_factor"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.retry.max_retries = 7;
        settings.pricing.path = Some(PathBuf::from("/etc/devcost/pricing.toml"));

        settings.save(&path).unwrap();
        let reloaded = Settings::load(&path, &ErrorRegistry::builtin()).unwrap();
        assert_eq!(reloaded, settings);
        assert_eq!(reloaded.retry.to_policy().max_retries, 7);
    }
}
