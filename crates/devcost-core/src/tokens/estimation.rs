//! Character-ratio token estimate
//!
//! count = ceil(english / E + chinese / C). CJK Unified Ideographs and
//! Extension A count as chinese; every other codepoint (whitespace and
//! punctuation included) counts as english.

use serde::{Deserialize, Serialize};

use super::counter::TokenCounter;
use crate::resilience::AppResult;

/// CJK Unified Ideographs (U+4E00–U+9FFF) and Extension A (U+3400–U+4DBF)
pub fn is_chinese(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// (english, chinese) character counts
pub fn count_chars(text: &str) -> (u64, u64) {
    text.chars().fold((0, 0), |(english, chinese), c| {
        if is_chinese(c) {
            (english, chinese + 1)
        } else {
            (english + 1, chinese)
        }
    })
}

/// Estimated token count; empty text is 0 tokens
pub fn estimate_tokens(text: &str, english_chars_per_token: f64, chinese_chars_per_token: f64) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let (english, chinese) = count_chars(text);
    let estimate =
        english as f64 / english_chars_per_token + chinese as f64 / chinese_chars_per_token;
    estimate.ceil() as u64
}

/// Per-script breakdown of an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDistribution {
    pub english_chars: u64,
    pub chinese_chars: u64,
    pub english_tokens: u64,
    pub chinese_tokens: u64,
    pub total_tokens: u64,
}

pub fn token_distribution(
    text: &str,
    english_chars_per_token: f64,
    chinese_chars_per_token: f64,
) -> TokenDistribution {
    let (english_chars, chinese_chars) = count_chars(text);
    TokenDistribution {
        english_chars,
        chinese_chars,
        english_tokens: (english_chars as f64 / english_chars_per_token).ceil() as u64,
        chinese_tokens: (chinese_chars as f64 / chinese_chars_per_token).ceil() as u64,
        total_tokens: estimate_tokens(text, english_chars_per_token, chinese_chars_per_token),
    }
}

/// [`TokenCounter`] backed by [`estimate_tokens`]
#[derive(Debug, Clone, Copy)]
pub struct EstimationCounter {
    english_chars_per_token: f64,
    chinese_chars_per_token: f64,
}

impl Default for EstimationCounter {
    fn default() -> Self {
        Self::new(4.0, 1.5)
    }
}

impl EstimationCounter {
    pub fn new(english_chars_per_token: f64, chinese_chars_per_token: f64) -> Self {
        Self {
            english_chars_per_token,
            chinese_chars_per_token,
        }
    }

    pub fn distribution(&self, text: &str) -> TokenDistribution {
        token_distribution(text, self.english_chars_per_token, self.chinese_chars_per_token)
    }
}

impl TokenCounter for EstimationCounter {
    fn name(&self) -> &str {
        "estimation"
    }

    fn count(&self, text: &str) -> AppResult<u64> {
        Ok(estimate_tokens(
            text,
            self.english_chars_per_token,
            self.chinese_chars_per_token,
        ))
    }
}
