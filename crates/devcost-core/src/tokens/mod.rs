//! Token measurement
//!
//! Text goes in, a token count comes out. Two measurement methods exist:
//! a character-ratio estimate that needs no tokenizer, and BPE counting with
//! the `cl100k_base` encoding. `auto` prefers BPE and falls back to the
//! configured fallback method when the tokenizer is unavailable.

mod calculator;
mod counter;
mod estimation;

pub use calculator::{CacheStats, MethodComparison, TokenCalculator};
pub use counter::{TiktokenCounter, TokenCounter};
pub use estimation::{
    count_chars, estimate_tokens, is_chinese, token_distribution, EstimationCounter,
    TokenDistribution,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a token count is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMethod {
    Estimation,
    Tiktoken,
    #[default]
    Auto,
}

impl CalculationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationMethod::Estimation => "estimation",
            CalculationMethod::Tiktoken => "tiktoken",
            CalculationMethod::Auto => "auto",
        }
    }
}

impl fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "estimation" | "estimate" => Ok(CalculationMethod::Estimation),
            "tiktoken" | "bpe" => Ok(CalculationMethod::Tiktoken),
            "auto" => Ok(CalculationMethod::Auto),
            other => Err(format!(
                "unknown calculation method '{other}' (expected estimation, tiktoken or auto)"
            )),
        }
    }
}

/// Token calculator settings (`[tokens]` in config.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub preferred_method: CalculationMethod,
    pub fallback_method: CalculationMethod,
    pub cache_enabled: bool,
    /// Maximum number of cached (text, method) entries
    pub cache_size: u64,
    pub english_chars_per_token: f64,
    pub chinese_chars_per_token: f64,
    /// Longest accepted input, in characters
    pub max_text_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            preferred_method: CalculationMethod::Auto,
            fallback_method: CalculationMethod::Estimation,
            cache_enabled: true,
            cache_size: 1000,
            english_chars_per_token: 4.0,
            chinese_chars_per_token: 1.5,
            max_text_length: 1_000_000,
        }
    }
}

impl TokenizerConfig {
    /// Problems that make the configuration unusable
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.english_chars_per_token.is_finite() && self.english_chars_per_token > 0.0) {
            problems.push(format!(
                "english_chars_per_token must be positive, got {}",
                self.english_chars_per_token
            ));
        }
        if !(self.chinese_chars_per_token.is_finite() && self.chinese_chars_per_token > 0.0) {
            problems.push(format!(
                "chinese_chars_per_token must be positive, got {}",
                self.chinese_chars_per_token
            ));
        }
        if self.max_text_length == 0 {
            problems.push("max_text_length must be at least 1".to_string());
        }
        problems
    }
}
