//! Error metadata registry
//!
//! Maps each [`ErrorCode`] to its severity, retry behaviour, bilingual title
//! and remediation text. The registry is an explicit value built once
//! (usually [`ErrorRegistry::builtin`]) and shared through an `Arc`, so tests
//! can hand components a fixture registry instead.

use std::collections::HashMap;
use std::time::Duration;

use super::error::{AppError, ErrorCause, ErrorCode, ErrorSeverity, LocalizedMessage};
use super::retry::RetryPolicy;

/// Metadata registered for one error code
#[derive(Debug, Clone)]
pub struct ErrorMetadata {
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub retry_policy: Option<RetryPolicy>,
    pub title: LocalizedMessage,
    pub remediation: String,
}

impl ErrorMetadata {
    pub fn new(severity: ErrorSeverity, en: &str, zh: &str, remediation: &str) -> Self {
        Self {
            severity,
            retryable: false,
            retry_policy: None,
            title: LocalizedMessage::new(en, zh),
            remediation: remediation.to_string(),
        }
    }

    /// Mark retryable with the given default policy
    pub fn retryable(mut self, policy: RetryPolicy) -> Self {
        self.retryable = true;
        self.retry_policy = Some(policy);
        self
    }

    /// Metadata used for codes missing from the registry
    pub fn fail_open() -> Self {
        Self::new(
            ErrorSeverity::Medium,
            "Unexpected error",
            "未知错误",
            "Check the logs for details",
        )
    }
}

/// Code → metadata table
#[derive(Debug, Clone, Default)]
pub struct ErrorRegistry {
    entries: HashMap<ErrorCode, ErrorMetadata>,
}

impl ErrorRegistry {
    /// Registry without any entries (every code fails open)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the metadata of every built-in code
    pub fn builtin() -> Self {
        let network = RetryPolicy::default()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_secs(30));
        let system = RetryPolicy::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10));
        let transient = RetryPolicy::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2));

        use ErrorCode::*;
        use ErrorSeverity::*;

        Self::empty()
            // Token
            .with(
                TokenInvalidText,
                ErrorMetadata::new(
                    Low,
                    "Invalid text for token calculation",
                    "用于计算令牌的文本无效",
                    "Provide non-empty text within the configured length limit",
                ),
            )
            .with(
                TokenCalculationFailed,
                ErrorMetadata::new(
                    Medium,
                    "Token calculation failed",
                    "令牌计算失败",
                    "Retry the calculation or switch to the estimation method",
                )
                .retryable(transient.clone()),
            )
            .with(
                TokenTokenizerUnavailable,
                ErrorMetadata::new(
                    Warning,
                    "Tokenizer unavailable",
                    "分词器不可用",
                    "Use method 'auto' or 'estimation' instead of 'tiktoken'",
                ),
            )
            // Cost
            .with(
                CostInvalidTokenCount,
                ErrorMetadata::new(
                    Low,
                    "Invalid token count",
                    "令牌数量无效",
                    "Token counts must be zero or positive",
                ),
            )
            .with(
                CostInvalidPricingModel,
                ErrorMetadata::new(
                    Medium,
                    "Unknown pricing model",
                    "未知的计价模型",
                    "Run 'devcost models' to list the registered models",
                ),
            )
            .with(
                CostCalculationFailed,
                ErrorMetadata::new(
                    Medium,
                    "Cost calculation failed",
                    "费用计算失败",
                    "Retry the calculation; check the price table if it persists",
                )
                .retryable(transient.clone()),
            )
            // Activity
            .with(
                ActivityClassificationFailed,
                ErrorMetadata::new(
                    Medium,
                    "Activity classification failed",
                    "活动分类失败",
                    "Check the classifier rules for invalid patterns",
                ),
            )
            .with(
                ActivityInvalidRecord,
                ErrorMetadata::new(
                    Low,
                    "Invalid activity record",
                    "活动记录无效",
                    "Inspect the record; it will be skipped",
                ),
            )
            // Data
            .with(
                DataParseFailed,
                ErrorMetadata::new(
                    Medium,
                    "Failed to parse data",
                    "数据解析失败",
                    "Validate the JSON syntax with: jq . <file>",
                ),
            )
            .with(
                DataNotFound,
                ErrorMetadata::new(
                    Low,
                    "Data not found",
                    "未找到数据",
                    "Check that the file or directory exists",
                ),
            )
            .with(
                DataIoFailed,
                ErrorMetadata::new(
                    High,
                    "Data I/O failed",
                    "数据读写失败",
                    "Check file permissions and free disk space",
                )
                .retryable(system.clone()),
            )
            // Config
            .with(
                ConfigInvalid,
                ErrorMetadata::new(
                    High,
                    "Invalid configuration",
                    "配置无效",
                    "Fix the reported entry in the configuration file",
                ),
            )
            .with(
                ConfigLoadFailed,
                ErrorMetadata::new(
                    High,
                    "Failed to load configuration",
                    "加载配置失败",
                    "Check the configuration file syntax (TOML, YAML or JSON)",
                ),
            )
            // Network
            .with(
                NetworkTimeout,
                ErrorMetadata::new(
                    Medium,
                    "Network timeout",
                    "网络超时",
                    "Check connectivity; the operation will be retried",
                )
                .retryable(network.clone()),
            )
            .with(
                NetworkUnavailable,
                ErrorMetadata::new(
                    High,
                    "Network unavailable",
                    "网络不可用",
                    "Check connectivity and proxy settings",
                )
                .retryable(network),
            )
            // System
            .with(
                SystemResource,
                ErrorMetadata::new(
                    High,
                    "System resource unavailable",
                    "系统资源不可用",
                    "Wait for the dependency to recover and retry",
                )
                .retryable(system),
            )
            .with(
                SystemInternal,
                ErrorMetadata::new(
                    Critical,
                    "Internal error",
                    "内部错误",
                    "Please report this issue with the logs attached",
                ),
            )
            // Report
            .with(
                ReportGenerationFailed,
                ErrorMetadata::new(
                    Medium,
                    "Report generation failed",
                    "报告生成失败",
                    "Check the report options and input records",
                ),
            )
    }

    /// Register (or replace) metadata for `code`
    pub fn with(mut self, code: ErrorCode, metadata: ErrorMetadata) -> Self {
        self.entries.insert(code, metadata);
        self
    }

    pub fn get(&self, code: ErrorCode) -> Option<&ErrorMetadata> {
        self.entries.get(&code)
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata for `code`, falling back to [`ErrorMetadata::fail_open`]
    pub fn metadata(&self, code: ErrorCode) -> ErrorMetadata {
        self.get(code).cloned().unwrap_or_else(ErrorMetadata::fail_open)
    }

    /// Build an error with the registered metadata applied
    pub fn create(&self, code: ErrorCode, detail: impl Into<String>) -> AppError {
        let detail = detail.into();
        let Some(meta) = self.get(code) else {
            return AppError::new(code, detail);
        };

        let messages = if detail.is_empty() {
            meta.title.clone()
        } else {
            LocalizedMessage::new(
                format!("{}: {}", meta.title.en, detail),
                format!("{}：{}", meta.title.zh, detail),
            )
        };

        let err = AppError::new(code, detail)
            .with_severity(meta.severity)
            .with_retryable(meta.retryable)
            .with_messages(messages)
            .with_remediation(meta.remediation.clone());

        match &meta.retry_policy {
            Some(policy) => err.with_retry_policy(policy.clone()),
            None => err,
        }
    }

    /// Coerce any error into an `AppError`, applying registry metadata to
    /// foreign errors (`SYSTEM_INTERNAL`)
    pub fn coerce(&self, err: anyhow::Error) -> AppError {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => self
                .create(ErrorCode::SystemInternal, other.to_string())
                .with_cause(ErrorCause::External {
                    kind: "anyhow".to_string(),
                    message: format!("{other:#}"),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_code() {
        let registry = ErrorRegistry::builtin();
        for code in ErrorCode::ALL {
            assert!(registry.contains(code), "missing metadata for {code}");
        }
    }

    #[test]
    fn test_validation_errors_are_terminal() {
        let registry = ErrorRegistry::builtin();
        for code in [
            ErrorCode::TokenInvalidText,
            ErrorCode::CostInvalidPricingModel,
            ErrorCode::CostInvalidTokenCount,
        ] {
            let err = registry.create(code, "bad input");
            assert!(!err.is_retryable(), "{code} must not be retryable");
            assert!(err.retry_policy().is_none());
        }
    }

    #[test]
    fn test_network_errors_carry_policy() {
        let registry = ErrorRegistry::builtin();
        let err = registry.create(ErrorCode::NetworkTimeout, "upstream");
        assert!(err.is_retryable());
        assert_eq!(err.retry_policy().map(|p| p.max_retries), Some(3));
        assert_eq!(err.messages().en, "Network timeout: upstream");
        assert_eq!(err.messages().zh, "网络超时：upstream");
        assert!(err.remediation().is_some());
    }

    #[test]
    fn test_unregistered_code_fails_open() {
        let registry = ErrorRegistry::empty();
        let err = registry.create(ErrorCode::NetworkTimeout, "upstream");
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(
            registry.metadata(ErrorCode::NetworkTimeout).title.en,
            "Unexpected error"
        );
    }

    #[test]
    fn test_coerce_passes_app_errors_through() {
        let registry = ErrorRegistry::builtin();
        let original = AppError::new(ErrorCode::NetworkUnavailable, "offline");
        let coerced = registry.coerce(anyhow::Error::new(original));
        assert_eq!(coerced.code(), ErrorCode::NetworkUnavailable);

        let foreign = registry.coerce(anyhow::anyhow!("boom"));
        assert_eq!(foreign.code(), ErrorCode::SystemInternal);
        assert_eq!(foreign.severity(), ErrorSeverity::Critical);
        assert!(foreign.cause().is_some());
    }
}
