//! Pluggable token counters

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::resilience::{AppError, AppResult, ErrorCause, ErrorCode};

/// Measures the token count of a piece of text
pub trait TokenCounter: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    fn count(&self, text: &str) -> AppResult<u64>;
}

static CL100K: OnceCell<Arc<TiktokenCounter>> = OnceCell::new();

/// BPE counter using the `cl100k_base` encoding
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Load the `cl100k_base` encoder
    pub fn cl100k() -> AppResult<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| {
            AppError::new(
                ErrorCode::TokenTokenizerUnavailable,
                "failed to load the cl100k_base encoding",
            )
            .with_component("tiktoken")
            .with_cause(ErrorCause::External {
                kind: "tiktoken".to_string(),
                message: format!("{e:#}"),
            })
        })?;
        debug!("Loaded cl100k_base encoding");
        Ok(Self { bpe })
    }

    /// Encoder shared by every calculator in the process
    pub fn shared() -> AppResult<Arc<Self>> {
        CL100K
            .get_or_try_init(|| Self::cl100k().map(Arc::new))
            .cloned()
    }
}

impl TokenCounter for TiktokenCounter {
    fn name(&self) -> &str {
        "tiktoken"
    }

    fn count(&self, text: &str) -> AppResult<u64> {
        Ok(self.bpe.encode_with_special_tokens(text).len() as u64)
    }
}

impl fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}
