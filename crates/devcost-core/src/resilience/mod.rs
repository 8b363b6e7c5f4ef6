//! Error model and resilience primitives
//!
//! Stable error codes with registry metadata, retry with backoff, a circuit
//! breaker, redaction and the central error handler.

pub mod circuit_breaker;
pub mod error;
pub mod handler;
pub mod registry;
pub mod retry;
pub mod sanitize;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{
    AppError, AppResult, ErrorCategory, ErrorCause, ErrorCode, ErrorContext, ErrorSeverity,
    Language, LocalizedMessage,
};
pub use handler::{ErrorHandler, ErrorListener};
pub use registry::{ErrorMetadata, ErrorRegistry};
pub use retry::{RetryManager, RetryPolicy};
pub use sanitize::{is_sensitive_key, Sanitizer};
