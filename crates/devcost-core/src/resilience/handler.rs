//! Central error handler
//!
//! `handle` sanitizes an error, logs it at a level derived from its
//! severity and fans it out to the registered listeners. Each listener call
//! runs as its own task behind a catch-and-log boundary, so a failing or
//! panicking observer affects neither the caller nor the other observers.
//!
//! Network, system and critical errors are routed through the handler's
//! circuit breaker: every such error counts as a failure, and while the
//! breaker is open their fan-out is short-circuited (they are still logged).

use parking_lot::RwLock;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::error::{AppError, AppResult, ErrorCategory, ErrorSeverity};
use super::registry::ErrorRegistry;
use super::retry::{RetryManager, RetryPolicy};
use super::sanitize::Sanitizer;

/// Observer notified of every handled (sanitized) error
pub trait ErrorListener: Send + Sync + 'static {
    /// Name used in logs when the listener fails
    fn name(&self) -> &str {
        "listener"
    }

    fn on_error(&self, err: &AppError) -> anyhow::Result<()>;
}

impl<F> ErrorListener for F
where
    F: Fn(&AppError) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_error(&self, err: &AppError) -> anyhow::Result<()> {
        self(err)
    }
}

pub struct ErrorHandler {
    registry: Arc<ErrorRegistry>,
    sanitizer: Sanitizer,
    listeners: RwLock<Vec<Arc<dyn ErrorListener>>>,
    breaker: CircuitBreaker,
    retry: RetryManager,
    default_policy: Option<RetryPolicy>,
}

impl ErrorHandler {
    pub fn new(
        registry: Arc<ErrorRegistry>,
        sanitizer: Sanitizer,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let breaker =
            CircuitBreaker::with_registry("error-handler", breaker_config, Arc::clone(&registry));
        Self {
            registry,
            sanitizer,
            listeners: RwLock::new(Vec::new()),
            breaker,
            retry: RetryManager::new(),
            default_policy: None,
        }
    }

    pub fn with_retry_manager(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    /// Recovery policy used for every error, in place of per-code policies
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = Some(policy);
        self
    }

    pub fn registry(&self) -> &Arc<ErrorRegistry> {
        &self.registry
    }

    pub fn add_listener(&self, listener: Arc<dyn ErrorListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    /// Handle an error: sanitize, log, notify. Returns the sanitized copy.
    pub fn handle(&self, err: AppError) -> AppError {
        let sanitized = self.sanitizer.sanitize(&err);
        log_error(&sanitized);

        if escalates(&sanitized) {
            match self.breaker.acquire() {
                Ok(()) => {
                    self.breaker.record_failure();
                    self.notify(&sanitized);
                }
                Err(_) => {
                    debug!(
                        code = %sanitized.code(),
                        "Error handler breaker open, listener fan-out suppressed"
                    );
                }
            }
        } else {
            self.notify(&sanitized);
        }

        sanitized
    }

    /// Coerce a foreign error and handle it
    pub fn handle_any(&self, err: anyhow::Error) -> AppError {
        self.handle(self.registry.coerce(err))
    }

    /// Handle `err`, then try to recover when it is retryable
    ///
    /// The recovery function runs under the configured default policy, else
    /// the error's own retry policy, else the registry's policy for its
    /// code. Terminal errors are
    /// returned without invoking `recovery`; [`handle`](Self::handle) is the
    /// path for callers without a recovery function.
    pub async fn handle_with_recovery<T, F, Fut>(&self, err: AppError, recovery: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let handled = self.handle(err);
        if !handled.is_retryable() {
            return Err(handled);
        }

        let policy = self
            .default_policy
            .clone()
            .or_else(|| handled.retry_policy().cloned())
            .or_else(|| self.registry.metadata(handled.code()).retry_policy)
            .unwrap_or_default();

        debug!(
            code = %handled.code(),
            max_retries = policy.max_retries,
            "Attempting recovery"
        );

        match self.retry.execute(recovery, &policy).await {
            Ok(value) => {
                self.breaker.record_success();
                info!(code = %handled.code(), "Recovered from error");
                Ok(value)
            }
            Err(last) => {
                warn!(code = %last.code(), "Recovery failed");
                Err(self.sanitizer.sanitize(&last))
            }
        }
    }

    fn notify(&self, err: &AppError) {
        let listeners: Vec<Arc<dyn ErrorListener>> = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let runtime = tokio::runtime::Handle::try_current().ok();
        for listener in listeners {
            let err = err.clone();
            match &runtime {
                Some(handle) => {
                    handle.spawn_blocking(move || invoke_listener(listener.as_ref(), &err));
                }
                None => invoke_listener(listener.as_ref(), &err),
            }
        }
    }
}

/// Errors that are routed through the breaker
fn escalates(err: &AppError) -> bool {
    matches!(err.category(), ErrorCategory::Network | ErrorCategory::System)
        || err.severity() == ErrorSeverity::Critical
}

fn log_error(err: &AppError) {
    let code = err.code();
    let category = err.category();
    let message = &err.messages().en;
    match err.severity() {
        ErrorSeverity::Critical | ErrorSeverity::High => {
            error!(%code, %category, severity = %err.severity(), "{}", message)
        }
        ErrorSeverity::Medium | ErrorSeverity::Warning => {
            warn!(%code, %category, severity = %err.severity(), "{}", message)
        }
        ErrorSeverity::Low => info!(%code, %category, severity = %err.severity(), "{}", message),
    }
}

fn invoke_listener(listener: &dyn ErrorListener, err: &AppError) {
    match catch_unwind(AssertUnwindSafe(|| listener.on_error(err))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(listener = listener.name(), error = %e, "Error listener failed"),
        Err(_) => warn!(listener = listener.name(), "Error listener panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ErrorCode, ErrorMetadata, RetryPolicy};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn handler(threshold: u32) -> ErrorHandler {
        let fast = RetryPolicy::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false);
        let registry = ErrorRegistry::builtin().with(
            ErrorCode::NetworkTimeout,
            ErrorMetadata::new(ErrorSeverity::Medium, "Network timeout", "网络超时", "retry")
                .retryable(fast),
        );
        ErrorHandler::new(
            Arc::new(registry),
            Sanitizer::new(Some(PathBuf::from("/home/alice"))),
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_secs(60)),
        )
    }

    fn channel_listener(tx: mpsc::UnboundedSender<AppError>) -> Arc<dyn ErrorListener> {
        Arc::new(move |err: &AppError| -> anyhow::Result<()> {
            tx.send(err.clone())?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_listeners_receive_sanitized_error() {
        let handler = handler(5);
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler.add_listener(channel_listener(tx));

        let err = AppError::new(ErrorCode::ConfigInvalid, "bad entry").with_parameter("secret", "s3cr3t");
        let returned = handler.handle(err);
        assert_eq!(returned.context().parameters["secret"], "[REDACTED]");

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.code(), ErrorCode::ConfigInvalid);
        assert_eq!(received.context().parameters["secret"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_failing_listeners_are_isolated() {
        let handler = handler(5);
        let (tx, mut rx) = mpsc::unbounded_channel();

        handler.add_listener(Arc::new(|_: &AppError| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("telemetry down"))
        }));
        handler.add_listener(Arc::new(|_: &AppError| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        handler.add_listener(channel_listener(tx));

        handler.handle(AppError::new(ErrorCode::DataParseFailed, "bad line"));

        let received = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(received.is_some());
    }

    #[test]
    fn test_notify_without_runtime_runs_inline() {
        let handler = handler(5);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        handler.add_listener(Arc::new(move |_: &AppError| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        handler.handle(AppError::new(ErrorCode::DataNotFound, "missing"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_escalated_errors_open_breaker_and_suppress_fanout() {
        let handler = handler(2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        handler.add_listener(Arc::new(move |_: &AppError| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..3 {
            handler.handle(AppError::new(ErrorCode::NetworkUnavailable, "offline"));
        }

        assert_eq!(handler.breaker_state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Non-escalated errors still reach listeners
        handler.handle(AppError::new(ErrorCode::DataNotFound, "missing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovery_runs_under_policy() {
        let handler = handler(5);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = handler.registry().create(ErrorCode::NetworkTimeout, "slow upstream");
        let result = handler
            .handle_with_recovery(err, || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AppError::new(ErrorCode::NetworkTimeout, "still slow").with_retryable(true))
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_configured_policy_overrides_code_policy() {
        let handler = handler(5).with_default_policy(RetryPolicy::default().with_max_retries(0));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = handler.registry().create(ErrorCode::NetworkTimeout, "slow upstream");
        let result: AppResult<()> = handler
            .handle_with_recovery(err, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::new(ErrorCode::NetworkTimeout, "still slow").with_retryable(true)) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::NetworkTimeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_errors_skip_recovery() {
        let handler = handler(5);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = handler.registry().create(ErrorCode::CostInvalidPricingModel, "gpt-x");
        let result: AppResult<()> = handler
            .handle_with_recovery(err, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::CostInvalidPricingModel);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handle_any_coerces_foreign_errors() {
        let handler = handler(5);
        let handled = handler.handle_any(anyhow::anyhow!("unexpected state"));
        assert_eq!(handled.code(), ErrorCode::SystemInternal);
        assert_eq!(handled.severity(), ErrorSeverity::Critical);
    }
}
