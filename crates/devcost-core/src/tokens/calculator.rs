//! Cached token calculator
//!
//! Measures text with the requested method and memoizes results per
//! (text, method) in a size-bounded cache. The calculator is safe to share
//! between threads; the cache is its only mutable state.

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::counter::{TiktokenCounter, TokenCounter};
use super::estimation::{EstimationCounter, TokenDistribution};
use super::{CalculationMethod, TokenizerConfig};
use crate::resilience::{AppError, AppResult, ErrorCode, ErrorRegistry};

/// Cache counters reported by [`TokenCalculator::cache_stats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub capacity: u64,
}

impl CacheStats {
    /// Hits / lookups, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Estimation vs BPE count for the same text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodComparison {
    pub estimation: u64,
    pub tiktoken: Option<u64>,
    pub difference: Option<u64>,
    /// 100 − 100 × difference / max(tiktoken, 1), clamped at 0
    pub accuracy: Option<f64>,
    pub recommendation: CalculationMethod,
}

pub struct TokenCalculator {
    config: TokenizerConfig,
    estimator: EstimationCounter,
    tokenizer: Option<Arc<dyn TokenCounter>>,
    cache: Option<Cache<(String, CalculationMethod), u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
    registry: Arc<ErrorRegistry>,
}

impl TokenCalculator {
    /// Calculator with the `cl100k_base` tokenizer when it can be loaded
    pub fn new(config: TokenizerConfig, registry: Arc<ErrorRegistry>) -> AppResult<Self> {
        let tokenizer = match TiktokenCounter::shared() {
            Ok(counter) => Some(counter as Arc<dyn TokenCounter>),
            Err(e) => {
                warn!(error = %e, "Tokenizer unavailable, falling back to estimation");
                None
            }
        };
        Self::build(config, registry, tokenizer)
    }

    /// Calculator with `counter` installed in place of the BPE tokenizer
    /// (`None` leaves only estimation available)
    pub fn with_counter(
        config: TokenizerConfig,
        registry: Arc<ErrorRegistry>,
        counter: Option<Arc<dyn TokenCounter>>,
    ) -> AppResult<Self> {
        Self::build(config, registry, counter)
    }

    fn build(
        config: TokenizerConfig,
        registry: Arc<ErrorRegistry>,
        tokenizer: Option<Arc<dyn TokenCounter>>,
    ) -> AppResult<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(registry
                .create(ErrorCode::ConfigInvalid, problems.join("; "))
                .with_component("token_calculator")
                .with_operation("configure"));
        }

        let cache = config
            .cache_enabled
            .then(|| Cache::builder().max_capacity(config.cache_size).build());

        Ok(Self {
            estimator: EstimationCounter::new(
                config.english_chars_per_token,
                config.chinese_chars_per_token,
            ),
            config,
            tokenizer,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            registry,
        })
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn is_tiktoken_available(&self) -> bool {
        self.tokenizer.is_some()
    }

    /// Count tokens in `text`
    ///
    /// Fails with `TOKEN_INVALID_TEXT` on empty or oversized input and with
    /// `TOKEN_TOKENIZER_UNAVAILABLE` when tiktoken is requested explicitly
    /// but not loaded.
    pub fn calculate_tokens(&self, text: &str, method: CalculationMethod) -> AppResult<u64> {
        self.validate_text(text)
            .map_err(|e| e.with_operation("calculate_tokens"))?;

        let Some(cache) = &self.cache else {
            return self.measure(text, method);
        };

        let key = (text.to_string(), method);
        if let Some(count) = cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(method = %method, tokens = count, "Token cache hit");
            return Ok(count);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let count = self.measure(text, method)?;
        debug!(method = %method, tokens = count, "Token cache miss");
        cache.insert(key, count);
        Ok(count)
    }

    /// Count tokens in text read from `reader`
    pub fn calculate_reader<R: Read>(&self, mut reader: R, method: CalculationMethod) -> AppResult<u64> {
        let mut text = String::new();
        reader.read_to_string(&mut text).map_err(|e| {
            let err = if e.kind() == io::ErrorKind::InvalidData {
                self.registry
                    .create(ErrorCode::TokenInvalidText, "input is not valid UTF-8")
                    .with_cause(crate::resilience::ErrorCause::external(&e))
            } else {
                AppError::from(e)
            };
            err.with_operation("calculate_reader")
                .with_component("token_calculator")
        })?;
        self.calculate_tokens(&text, method)
    }

    /// Per-script breakdown of the estimate
    pub fn analyze_token_distribution(&self, text: &str) -> TokenDistribution {
        self.estimator.distribution(text)
    }

    /// Compare the estimate with the BPE count
    ///
    /// BPE fields are `None` when the tokenizer is not available.
    pub fn compare_calculation_methods(&self, text: &str) -> AppResult<MethodComparison> {
        let estimation = self.calculate_tokens(text, CalculationMethod::Estimation)?;

        let tiktoken = match &self.tokenizer {
            Some(_) => match self.calculate_tokens(text, CalculationMethod::Tiktoken) {
                Ok(count) => Some(count),
                Err(e) => {
                    debug!(error = %e, "Tokenizer failed during comparison");
                    None
                }
            },
            None => None,
        };

        let difference = tiktoken.map(|t| t.abs_diff(estimation));
        let accuracy = tiktoken.zip(difference).map(|(t, diff)| {
            let accuracy = 100.0 - 100.0 * diff as f64 / t.max(1) as f64;
            accuracy.max(0.0)
        });
        let recommendation = if tiktoken.is_some() {
            CalculationMethod::Tiktoken
        } else {
            CalculationMethod::Estimation
        };

        Ok(MethodComparison {
            estimation,
            tiktoken,
            difference,
            accuracy,
            recommendation,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        let entries = match &self.cache {
            Some(cache) => {
                cache.run_pending_tasks();
                cache.entry_count()
            }
            None => 0,
        };
        CacheStats {
            enabled: self.cache.is_some(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            capacity: if self.cache.is_some() {
                self.config.cache_size
            } else {
                0
            },
        }
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            cache.run_pending_tasks();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Token cache cleared");
    }

    fn validate_text(&self, text: &str) -> AppResult<()> {
        if text.is_empty() {
            return Err(self
                .registry
                .create(ErrorCode::TokenInvalidText, "text is empty")
                .with_component("token_calculator"));
        }

        // Byte length bounds the char count from above
        if text.len() > self.config.max_text_length {
            let length = text.chars().count();
            if length > self.config.max_text_length {
                return Err(self
                    .registry
                    .create(
                        ErrorCode::TokenInvalidText,
                        format!(
                            "text is {length} characters, limit is {}",
                            self.config.max_text_length
                        ),
                    )
                    .with_component("token_calculator")
                    .with_parameter("length", length)
                    .with_parameter("max_text_length", self.config.max_text_length));
            }
        }
        Ok(())
    }

    fn measure(&self, text: &str, method: CalculationMethod) -> AppResult<u64> {
        match method {
            CalculationMethod::Estimation => self.estimator.count(text),
            CalculationMethod::Tiktoken => match &self.tokenizer {
                Some(counter) => counter.count(text).map_err(|e| {
                    e.with_operation("calculate_tokens")
                        .with_component("token_calculator")
                }),
                None => Err(self
                    .registry
                    .create(
                        ErrorCode::TokenTokenizerUnavailable,
                        "tiktoken was requested but no tokenizer is loaded",
                    )
                    .with_operation("calculate_tokens")
                    .with_component("token_calculator")),
            },
            CalculationMethod::Auto => {
                if let Some(counter) = &self.tokenizer {
                    match counter.count(text) {
                        Ok(count) => return Ok(count),
                        Err(e) => {
                            debug!(counter = counter.name(), error = %e, "Tokenizer failed, using fallback");
                        }
                    }
                }
                self.measure_fallback(text)
            }
        }
    }

    fn measure_fallback(&self, text: &str) -> AppResult<u64> {
        match self.config.fallback_method {
            CalculationMethod::Tiktoken => self.measure(text, CalculationMethod::Tiktoken),
            // `auto` as a fallback would recurse; it means "estimate"
            CalculationMethod::Estimation | CalculationMethod::Auto => self.estimator.count(text),
        }
    }
}

impl fmt::Debug for TokenCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCalculator")
            .field("config", &self.config)
            .field(
                "tokenizer",
                &self.tokenizer.as_ref().map(|counter| counter.name().to_string()),
            )
            .field("cache_enabled", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts words and records how often it was invoked
    struct WordCounter {
        calls: AtomicUsize,
        fail: bool,
    }

    impl WordCounter {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl TokenCounter for WordCounter {
        fn name(&self) -> &str {
            "words"
        }

        fn count(&self, text: &str) -> AppResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::new(ErrorCode::TokenCalculationFailed, "fixture failure"))
            } else {
                Ok(text.split_whitespace().count() as u64)
            }
        }
    }

    fn registry() -> Arc<ErrorRegistry> {
        Arc::new(ErrorRegistry::builtin())
    }

    fn calculator(counter: Option<Arc<dyn TokenCounter>>) -> TokenCalculator {
        TokenCalculator::with_counter(TokenizerConfig::default(), registry(), counter).unwrap()
    }

    #[test]
    fn test_estimation_method() {
        let calc = calculator(None);
        assert_eq!(
            calc.calculate_tokens("Hello 世界", CalculationMethod::Estimation)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let calc = calculator(None);
        let err = calc
            .calculate_tokens("", CalculationMethod::Estimation)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalidText);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_oversized_text_is_rejected() {
        let config = TokenizerConfig {
            max_text_length: 5,
            ..Default::default()
        };
        let calc = TokenCalculator::with_counter(config, registry(), None).unwrap();

        // 5 chars, 15 bytes
        assert!(calc.calculate_tokens("世界世界世", CalculationMethod::Estimation).is_ok());
        let err = calc
            .calculate_tokens("abcdef", CalculationMethod::Estimation)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalidText);
        assert_eq!(err.context().parameters["length"], 6);
    }

    #[test]
    fn test_auto_prefers_installed_counter() {
        let counter = WordCounter::new(false);
        let calc = calculator(Some(counter.clone()));
        assert_eq!(
            calc.calculate_tokens("one two three four five six", CalculationMethod::Auto)
                .unwrap(),
            6
        );
    }

    #[test]
    fn test_auto_falls_back_when_counter_fails() {
        let calc = calculator(Some(WordCounter::new(true)));
        assert_eq!(
            calc.calculate_tokens("Hello 世界", CalculationMethod::Auto)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_explicit_tiktoken_without_tokenizer_fails() {
        let calc = calculator(None);
        assert!(!calc.is_tiktoken_available());
        let err = calc
            .calculate_tokens("hello", CalculationMethod::Tiktoken)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenTokenizerUnavailable);

        // auto silently estimates
        assert_eq!(calc.calculate_tokens("hello", CalculationMethod::Auto).unwrap(), 2);
    }

    #[test]
    fn test_cache_hits_skip_measurement() {
        let counter = WordCounter::new(false);
        let calc = calculator(Some(counter.clone()));

        for _ in 0..3 {
            calc.calculate_tokens("cached text here", CalculationMethod::Tiktoken)
                .unwrap();
        }

        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        let stats = calc.cache_stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_is_keyed_by_method() {
        let counter = WordCounter::new(false);
        let calc = calculator(Some(counter.clone()));

        let bpe = calc
            .calculate_tokens("alpha beta", CalculationMethod::Tiktoken)
            .unwrap();
        let est = calc
            .calculate_tokens("alpha beta", CalculationMethod::Estimation)
            .unwrap();
        assert_eq!(bpe, 2);
        assert_eq!(est, 3);
        assert_eq!(calc.cache_stats().misses, 2);
    }

    #[test]
    fn test_clear_cache() {
        let calc = calculator(None);
        calc.calculate_tokens("abc", CalculationMethod::Estimation)
            .unwrap();
        calc.clear_cache();
        let stats = calc.cache_stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[test]
    fn test_disabled_cache_always_measures() {
        let config = TokenizerConfig {
            cache_enabled: false,
            ..Default::default()
        };
        let counter = WordCounter::new(false);
        let calc =
            TokenCalculator::with_counter(config, registry(), Some(counter.clone())).unwrap();

        calc.calculate_tokens("a b", CalculationMethod::Auto).unwrap();
        calc.calculate_tokens("a b", CalculationMethod::Auto).unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
        assert!(!calc.cache_stats().enabled);
    }

    #[test]
    fn test_compare_with_counter() {
        let calc = calculator(Some(WordCounter::new(false)));
        // estimation: ceil(19 / 4) = 5, words: 4
        let cmp = calc
            .compare_calculation_methods("the quick brown fox")
            .unwrap();
        assert_eq!(cmp.estimation, 5);
        assert_eq!(cmp.tiktoken, Some(4));
        assert_eq!(cmp.difference, Some(1));
        assert_eq!(cmp.accuracy, Some(75.0));
        assert_eq!(cmp.recommendation, CalculationMethod::Tiktoken);
    }

    #[test]
    fn test_compare_accuracy_is_clamped() {
        let calc = calculator(Some(WordCounter::new(false)));
        // estimation: ceil(12 / 4) = 3, words: 1
        let cmp = calc.compare_calculation_methods("abcdefghijkl").unwrap();
        assert_eq!(cmp.difference, Some(2));
        assert_eq!(cmp.accuracy, Some(0.0));
    }

    #[test]
    fn test_compare_without_tokenizer() {
        let calc = calculator(None);
        let cmp = calc.compare_calculation_methods("Hello 世界").unwrap();
        assert_eq!(cmp.estimation, 3);
        assert_eq!(cmp.tiktoken, None);
        assert_eq!(cmp.difference, None);
        assert_eq!(cmp.accuracy, None);
        assert_eq!(cmp.recommendation, CalculationMethod::Estimation);
    }

    #[test]
    fn test_calculate_reader() {
        let calc = calculator(None);
        let count = calc
            .calculate_reader("Hello 世界".as_bytes(), CalculationMethod::Estimation)
            .unwrap();
        assert_eq!(count, 3);

        let err = calc
            .calculate_reader(&[0xffu8, 0xfe, 0xfd][..], CalculationMethod::Estimation)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenInvalidText);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TokenizerConfig {
            english_chars_per_token: 0.0,
            ..Default::default()
        };
        let err = TokenCalculator::with_counter(config, registry(), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_concurrent_access_is_consistent() {
        let calc = Arc::new(calculator(None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let calc = Arc::clone(&calc);
                std::thread::spawn(move || {
                    calc.calculate_tokens("shared input text", CalculationMethod::Estimation)
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }
        let stats = calc.cache_stats();
        assert_eq!(stats.hits + stats.misses, 8);
    }
}
