//! Structured application error
//!
//! Every failure inside the core surfaces as an [`AppError`]: a stable code,
//! its category and severity, bilingual messages, free-form context and an
//! owned cause chain. Values are built at the failure site and enriched with
//! by-value `with_*` calls; nothing mutates an error after it is shared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::retry::RetryPolicy;

/// Convenience alias used throughout the core
pub type AppResult<T> = std::result::Result<T, AppError>;

// ===================
// Codes and taxonomy
// ===================

/// Stable machine-facing error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TokenInvalidText,
    TokenCalculationFailed,
    TokenTokenizerUnavailable,
    CostInvalidTokenCount,
    CostInvalidPricingModel,
    CostCalculationFailed,
    ActivityClassificationFailed,
    ActivityInvalidRecord,
    DataParseFailed,
    DataNotFound,
    DataIoFailed,
    ConfigInvalid,
    ConfigLoadFailed,
    NetworkTimeout,
    NetworkUnavailable,
    SystemResource,
    SystemInternal,
    ReportGenerationFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 18] = [
        ErrorCode::TokenInvalidText,
        ErrorCode::TokenCalculationFailed,
        ErrorCode::TokenTokenizerUnavailable,
        ErrorCode::CostInvalidTokenCount,
        ErrorCode::CostInvalidPricingModel,
        ErrorCode::CostCalculationFailed,
        ErrorCode::ActivityClassificationFailed,
        ErrorCode::ActivityInvalidRecord,
        ErrorCode::DataParseFailed,
        ErrorCode::DataNotFound,
        ErrorCode::DataIoFailed,
        ErrorCode::ConfigInvalid,
        ErrorCode::ConfigLoadFailed,
        ErrorCode::NetworkTimeout,
        ErrorCode::NetworkUnavailable,
        ErrorCode::SystemResource,
        ErrorCode::SystemInternal,
        ErrorCode::ReportGenerationFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TokenInvalidText => "TOKEN_INVALID_TEXT",
            ErrorCode::TokenCalculationFailed => "TOKEN_CALCULATION_FAILED",
            ErrorCode::TokenTokenizerUnavailable => "TOKEN_TOKENIZER_UNAVAILABLE",
            ErrorCode::CostInvalidTokenCount => "COST_INVALID_TOKEN_COUNT",
            ErrorCode::CostInvalidPricingModel => "COST_INVALID_PRICING_MODEL",
            ErrorCode::CostCalculationFailed => "COST_CALCULATION_FAILED",
            ErrorCode::ActivityClassificationFailed => "ACTIVITY_CLASSIFICATION_FAILED",
            ErrorCode::ActivityInvalidRecord => "ACTIVITY_INVALID_RECORD",
            ErrorCode::DataParseFailed => "DATA_PARSE_FAILED",
            ErrorCode::DataNotFound => "DATA_NOT_FOUND",
            ErrorCode::DataIoFailed => "DATA_IO_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigLoadFailed => "CONFIG_LOAD_FAILED",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            ErrorCode::SystemResource => "SYSTEM_RESOURCE",
            ErrorCode::SystemInternal => "SYSTEM_INTERNAL",
            ErrorCode::ReportGenerationFailed => "REPORT_GENERATION_FAILED",
        }
    }

    /// Category is intrinsic to the code
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::TokenInvalidText
            | ErrorCode::TokenCalculationFailed
            | ErrorCode::TokenTokenizerUnavailable => ErrorCategory::Token,
            ErrorCode::CostInvalidTokenCount
            | ErrorCode::CostInvalidPricingModel
            | ErrorCode::CostCalculationFailed => ErrorCategory::Cost,
            ErrorCode::ActivityClassificationFailed | ErrorCode::ActivityInvalidRecord => {
                ErrorCategory::Activity
            }
            ErrorCode::DataParseFailed | ErrorCode::DataNotFound | ErrorCode::DataIoFailed => {
                ErrorCategory::Data
            }
            ErrorCode::ConfigInvalid | ErrorCode::ConfigLoadFailed => ErrorCategory::Config,
            ErrorCode::NetworkTimeout | ErrorCode::NetworkUnavailable => ErrorCategory::Network,
            ErrorCode::SystemResource | ErrorCode::SystemInternal => ErrorCategory::System,
            ErrorCode::ReportGenerationFailed => ErrorCategory::Report,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem family of an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Token,
    Cost,
    Activity,
    Data,
    Config,
    Network,
    System,
    Report,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Token => "token",
            ErrorCategory::Cost => "cost",
            ErrorCategory::Activity => "activity",
            ErrorCategory::Data => "data",
            ErrorCategory::Config => "config",
            ErrorCategory::Network => "network",
            ErrorCategory::System => "system",
            ErrorCategory::Report => "report",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad an error is, from the operator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
    Warning,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::High => "high",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::Low => "low",
            ErrorSeverity::Warning => "warning",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported message languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

/// Human-facing message in both supported languages
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalizedMessage {
    pub en: String,
    pub zh: String,
}

impl LocalizedMessage {
    pub fn new(en: impl Into<String>, zh: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            zh: zh.into(),
        }
    }

    /// Same text in every language (used when no translation is registered)
    pub fn same(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            en: text.clone(),
            zh: text,
        }
    }

    pub fn get(&self, language: Language) -> &str {
        match language {
            Language::English => &self.en,
            Language::Chinese => &self.zh,
        }
    }
}

// ===================
// Context
// ===================

/// Free-form context attached at (or above) the failure site
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Fill fields that are unset here from `other`; parameters are merged
    /// with existing keys taking precedence
    fn merged_with(mut self, other: ErrorContext) -> Self {
        if self.operation.is_none() {
            self.operation = other.operation;
        }
        if self.component.is_none() {
            self.component = other.component;
        }
        if self.correlation_id.is_none() {
            self.correlation_id = other.correlation_id;
        }
        if self.session_id.is_none() {
            self.session_id = other.session_id;
        }
        for (key, value) in other.parameters {
            self.parameters.entry(key).or_insert(value);
        }
        self
    }
}

// ===================
// Cause chain
// ===================

/// One link of the cause chain
#[derive(Debug, Clone, Error)]
pub enum ErrorCause {
    /// A wrapped application error (keeps its own code)
    #[error(transparent)]
    App(Box<AppError>),

    /// A foreign error flattened to text so the chain stays cloneable
    #[error("{kind}: {message}")]
    External { kind: String, message: String },
}

impl ErrorCause {
    /// Code of this link, if it is an application error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ErrorCause::App(err) => Some(err.code()),
            ErrorCause::External { .. } => None,
        }
    }

    pub fn external<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let kind = std::any::type_name_of_val(err)
            .rsplit("::")
            .next()
            .unwrap_or("error")
            .to_string();
        ErrorCause::External {
            kind,
            message: err.to_string(),
        }
    }
}

// ===================
// AppError
// ===================

/// Structured error shared by every component of the core
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct AppError {
    code: ErrorCode,
    category: ErrorCategory,
    severity: ErrorSeverity,
    message: String,
    messages: LocalizedMessage,
    context: ErrorContext,
    #[source]
    cause: Option<Box<ErrorCause>>,
    retryable: bool,
    retry_policy: Option<RetryPolicy>,
    remediation: Option<String>,
    timestamp: DateTime<Utc>,
    stack: Option<Arc<str>>,
}

impl AppError {
    /// Build an error with fail-open metadata (medium severity, not
    /// retryable). Use [`super::ErrorRegistry::create`] to apply the
    /// registered metadata for the code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(Arc::from(backtrace.to_string())),
            _ => None,
        };

        Self {
            code,
            category: code.category(),
            severity: ErrorSeverity::Medium,
            messages: LocalizedMessage::same(message.clone()),
            message,
            context: ErrorContext::default(),
            cause: None,
            retryable: false,
            retry_policy: None,
            remediation: None,
            timestamp: Utc::now(),
            stack,
        }
    }

    /// Wrap a foreign error under `code`, keeping it as the cause
    pub fn from_error<E: std::error::Error + ?Sized>(code: ErrorCode, err: &E) -> Self {
        Self::new(code, err.to_string()).with_cause(ErrorCause::external(err))
    }

    // ----- enrichment (by value) -----

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_messages(mut self, messages: LocalizedMessage) -> Self {
        self.messages = messages;
        self
    }

    /// Merge `context` into the existing one (existing values win)
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = self.context.merged_with(context);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        if self.context.operation.is_none() {
            self.context.operation = Some(operation.into());
        }
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        if self.context.component.is_none() {
            self.context.component = Some(component.into());
        }
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.context.correlation_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.context.session_id = Some(id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<ErrorCause>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Wrap `self` as the cause of a new error with a different code
    pub fn wrap(self, code: ErrorCode, message: impl Into<String>) -> AppError {
        AppError::new(code, message).with_cause(self)
    }

    // ----- accessors -----

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// Failure-site detail message
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn messages(&self) -> &LocalizedMessage {
        &self.messages
    }

    pub fn localized(&self, language: Language) -> &str {
        self.messages.get(language)
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn remediation(&self) -> Option<&str> {
        self.remediation.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Captured call stack (only when `RUST_BACKTRACE` is enabled)
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// Codes of the whole chain, starting with this error
    ///
    /// External links are skipped since they carry no code.
    pub fn chain_codes(&self) -> Vec<ErrorCode> {
        let mut codes = vec![self.code];
        let mut next = self.cause();
        while let Some(cause) = next {
            match cause {
                ErrorCause::App(inner) => {
                    codes.push(inner.code);
                    next = inner.cause();
                }
                ErrorCause::External { .. } => break,
            }
        }
        codes
    }

    /// Deepest link of the cause chain
    pub fn root_cause(&self) -> Option<&ErrorCause> {
        let mut current = self.cause()?;
        while let ErrorCause::App(inner) = current {
            match inner.cause() {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }

    /// JSON document for logging/telemetry collaborators
    pub fn to_json(&self) -> Value {
        serde_json::to_value(ErrorReport::from(self)).unwrap_or_else(|_| {
            serde_json::json!({
                "code": self.code.as_str(),
                "message": self.message,
            })
        })
    }

    // Used by the sanitizer to rebuild a redacted copy
    pub(crate) fn replace_text(
        mut self,
        message: String,
        messages: LocalizedMessage,
        context: ErrorContext,
        cause: Option<ErrorCause>,
    ) -> Self {
        self.message = message;
        self.messages = messages;
        self.context = context;
        self.cause = cause.map(Box::new);
        self
    }
}

impl From<AppError> for ErrorCause {
    fn from(err: AppError) -> Self {
        ErrorCause::App(Box::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            ErrorCode::DataNotFound
        } else {
            ErrorCode::DataIoFailed
        };
        AppError::from_error(code, &err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::from_error(ErrorCode::DataParseFailed, &err)
    }
}

/// Serialized form of an error
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReport<'a> {
    code: ErrorCode,
    category: ErrorCategory,
    severity: ErrorSeverity,
    message: &'a str,
    messages: &'a LocalizedMessage,
    context: &'a ErrorContext,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    remediation: Option<&'a str>,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<Value>,
}

impl<'a> From<&'a AppError> for ErrorReport<'a> {
    fn from(err: &'a AppError) -> Self {
        let cause = err.cause().map(|cause| match cause {
            ErrorCause::App(inner) => inner.to_json(),
            ErrorCause::External { kind, message } => {
                serde_json::json!({ "kind": kind, "message": message })
            }
        });

        Self {
            code: err.code,
            category: err.category,
            severity: err.severity,
            message: &err.message,
            messages: &err.messages,
            context: &err.context,
            retryable: err.retryable,
            remediation: err.remediation.as_deref(),
            timestamp: err.timestamp,
            cause,
        }
    }
}
