//! Three-state circuit breaker
//!
//! closed → open after `failure_threshold` consecutive failures; open calls
//! are rejected with `SYSTEM_RESOURCE` without touching the wrapped function;
//! after `recovery_timeout` the breaker turns half-open and admits a single
//! trial call whose outcome closes or re-opens it. `call` never sleeps.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::{AppError, AppResult, ErrorCode};
use super::registry::ErrorRegistry;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    /// Move open → half-open once the recovery timeout elapsed
    fn refresh(&mut self, recovery_timeout: Duration) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = false;
                }
            }
        }
    }
}

/// Guard that stops calling a failing dependency for a cooldown period
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    registry: Arc<ErrorRegistry>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_registry(name, config, Arc::new(ErrorRegistry::builtin()))
    }

    pub fn with_registry(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        registry: Arc<ErrorRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state (reports half-open once the recovery timeout elapsed)
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        inner.refresh(self.config.recovery_timeout);
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Consecutive failures counted so far
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `f` through the breaker
    pub fn call<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> AppResult<T>,
    {
        let mut slot = TrialSlot::new(self, self.try_acquire()?);
        let result = f();
        slot.settle();
        self.record(&result);
        result
    }

    /// Async variant of [`call`](Self::call); the breaker itself never awaits
    pub async fn call_async<T, F, Fut>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut slot = TrialSlot::new(self, self.try_acquire()?);
        let result = f().await;
        slot.settle();
        self.record(&result);
        result
    }

    /// Check whether a call may proceed, reserving the half-open trial slot
    pub fn acquire(&self) -> AppResult<()> {
        self.try_acquire().map(|_| ())
    }

    /// Like [`acquire`](Self::acquire); `Ok(true)` when the half-open trial
    /// slot was reserved by this call
    fn try_acquire(&self) -> AppResult<bool> {
        let mut inner = self.inner.lock();
        inner.refresh(self.config.recovery_timeout);

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                debug!(breaker = %self.name, "Circuit breaker admitting trial call");
                Ok(true)
            }
            CircuitState::HalfOpen => Err(self.rejection(None)),
            CircuitState::Open => {
                let remaining = inner.opened_at.map(|opened| {
                    self.config
                        .recovery_timeout
                        .saturating_sub(opened.elapsed())
                });
                Err(self.rejection(remaining))
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(breaker = %self.name, "Circuit breaker closed after successful trial");
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.name,
                    failures = inner.failures,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                warn!(breaker = %self.name, "Trial call failed, circuit breaker re-opened");
            }
            _ => {}
        }
    }

    /// Give back a trial slot whose call never reported an outcome
    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            debug!(breaker = %self.name, "Trial call abandoned, slot released");
        }
    }

    fn record<T>(&self, result: &AppResult<T>) {
        match result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
    }

    fn rejection(&self, retry_after: Option<Duration>) -> AppError {
        let err = self
            .registry
            .create(
                ErrorCode::SystemResource,
                format!("circuit breaker '{}' is open", self.name),
            )
            .with_component("circuit_breaker")
            .with_parameter("breaker", self.name.clone());
        match retry_after {
            Some(remaining) => err.with_parameter("retry_after_ms", remaining.as_millis() as u64),
            None => err,
        }
    }
}

/// Releases a reserved trial slot when the call is dropped or unwinds
/// before its outcome is recorded
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    reserved: bool,
}

impl<'a> TrialSlot<'a> {
    fn new(breaker: &'a CircuitBreaker, reserved: bool) -> Self {
        Self { breaker, reserved }
    }

    fn settle(&mut self) {
        self.reserved = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.reserved {
            self.breaker.release_trial();
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::thread;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_millis(timeout_ms)),
        )
    }

    fn failing() -> AppResult<()> {
        Err(AppError::new(ErrorCode::NetworkUnavailable, "down"))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 10_000);
        for _ in 0..2 {
            assert!(cb.call(failing).is_err());
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(cb.call(failing).is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_open_breaker_never_invokes_function() {
        let cb = breaker(1, 10_000);
        let _ = cb.call(failing);

        let invoked = Cell::new(false);
        let result = cb.call(|| {
            invoked.set(true);
            Ok(())
        });

        assert!(!invoked.get());
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SystemResource);
        assert_eq!(err.context().parameters["breaker"], "test");
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = breaker(2, 30);
        let _ = cb.call(failing);
        let _ = cb.call(failing);
        assert_eq!(cb.state(), CircuitState::Open);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.call(|| Ok(())).is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 30);
        let _ = cb.call(failing);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.call(failing).is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cb = breaker(1, 30);
        let _ = cb.call(failing);
        thread::sleep(Duration::from_millis(60));

        assert!(cb.acquire().is_ok());
        assert!(cb.acquire().is_err());
    }

    #[test]
    fn test_success_resets_failure_count_when_closed() {
        let cb = breaker(5, 10_000);
        let _ = cb.call(failing);
        let _ = cb.call(failing);
        assert_eq!(cb.failure_count(), 2);
        assert!(cb.call(|| Ok(())).is_ok());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, 10_000);
        let _ = cb.call(failing);
        assert!(cb.is_open());
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_call_async() {
        let cb = breaker(1, 10_000);
        let value = cb.call_async(|| async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let _ = cb.call_async(|| async { failing() }).await;
        assert!(cb.is_open());
    }

    #[tokio::test]
    async fn test_dropped_trial_releases_slot() {
        let cb = breaker(1, 30);
        let _ = cb.call(failing);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let stalled = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call_async(|| std::future::pending::<AppResult<()>>()),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.call_async(|| async { Ok(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
