//! Retry executor with exponential backoff
//!
//! The backoff wait is the only deliberate suspension point of the core and
//! can be interrupted with a [`CancellationToken`] or a deadline.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{AppError, AppResult, ErrorCode};

/// Parameters governing how often, and how slowly, an operation is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Codes worth retrying; when empty the error's own flag decides
    pub retryable_codes: Vec<ErrorCode>,
    /// Apply symmetric jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            retryable_codes: Vec::new(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            retryable_codes: Vec::new(),
            jitter: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_retryable_codes(mut self, codes: Vec<ErrorCode>) -> Self {
        self.retryable_codes = codes;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retry number `attempt` (0-indexed):
    /// `initial_delay × backoff_factor^attempt`, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Whether `err` may be retried under this policy
    pub fn is_retryable(&self, err: &AppError) -> bool {
        if self.retryable_codes.is_empty() {
            err.is_retryable()
        } else {
            self.retryable_codes.contains(&err.code())
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Maximum relative jitter (0.2 = ±20%)
    jitter_ratio: f64,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self { jitter_ratio: 0.2 }
    }
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Execute `operation`, retrying retryable failures
    pub async fn execute<T, F, Fut>(&self, operation: F, policy: &RetryPolicy) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.run(operation, policy, None, None).await
    }

    /// Like [`execute`](Self::execute), but stops waiting as soon as `token`
    /// is cancelled
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        token: &CancellationToken,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.run(operation, policy, Some(token), None).await
    }

    /// Like [`execute`](Self::execute), but gives up once `deadline` passes
    pub async fn execute_with_deadline<T, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        deadline: Instant,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.run(operation, policy, None, Some(deadline)).await
    }

    async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        token: Option<&CancellationToken>,
        deadline: Option<Instant>,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !policy.is_retryable(&err) {
                debug!(code = %err.code(), "Non-retryable error, giving up");
                return Err(err);
            }

            if attempt >= policy.max_retries {
                warn!(
                    code = %err.code(),
                    attempts = attempt + 1,
                    "Retries exhausted"
                );
                return Err(err.with_parameter("attempts", attempt + 1));
            }

            let delay = self.jittered(policy.delay_for_attempt(attempt), policy.jitter);
            debug!(
                code = %err.code(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );

            if let Some(deadline) = deadline {
                if Instant::now() + delay > deadline {
                    debug!("Retry deadline reached");
                    return Err(err.with_parameter("deadline_exceeded", true));
                }
            }

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("Retry cancelled during backoff");
                            return Err(err.with_parameter("cancelled", true));
                        }
                        _ = sleep(delay) => {}
                    }
                }
                None => sleep(delay).await,
            }

            attempt += 1;
        }
    }

    fn jittered(&self, delay: Duration, enabled: bool) -> Duration {
        if !enabled || self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + offset)).max(0.0))
    }
}
