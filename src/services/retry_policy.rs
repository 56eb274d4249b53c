//! Retry policy for executor calls.
//!
//! Each attempt runs under a timeout. Transient failures (and timeouts) are
//! retried up to `max_retries` times with a delay chosen by the configured
//! [`RateLimitStrategy`]; anything else fails immediately.

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::domain::errors::EngineError;
use crate::domain::models::{EngineConfig, RateLimitStrategy};

/// Value (or error) together with how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct FailureStats {
    attempts: AtomicU64,
    transient_failures: AtomicU64,
}

/// Retry policy with strategy-dependent delays.
///
/// Clones share failure statistics, which the adaptive strategy uses to
/// stretch delays when the executor is struggling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    strategy: RateLimitStrategy,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    task_timeout: Duration,
    stats: Arc<FailureStats>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            RateLimitStrategy::Backoff,
            3,
            Duration::from_millis(200),
            Duration::from_secs(5),
            Duration::from_secs(300),
        )
    }
}

impl RetryPolicy {
    pub fn new(
        strategy: RateLimitStrategy,
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        task_timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            max_retries,
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            task_timeout,
            stats: Arc::new(FailureStats::default()),
        }
    }

    pub fn from_engine_config(config: &EngineConfig) -> Self {
        Self::new(
            config.rate_limit_strategy,
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            Duration::from_secs(config.task_timeout_secs),
        )
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub const fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    /// Override the per-attempt timeout.
    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Fraction of attempts so far that failed transiently.
    #[allow(clippy::cast_precision_loss)]
    pub fn transient_failure_ratio(&self) -> f64 {
        let attempts = self.stats.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.stats.transient_failures.load(Ordering::Relaxed) as f64 / attempts as f64
    }

    fn delays(&self) -> Box<dyn Backoff + Send> {
        match self.strategy {
            RateLimitStrategy::Fixed => Box::new(Constant::new(self.initial_backoff)),
            RateLimitStrategy::Backoff | RateLimitStrategy::Adaptive => Box::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(self.initial_backoff)
                    .with_max_interval(self.max_backoff)
                    .with_multiplier(2.0)
                    .with_randomization_factor(0.0)
                    .with_max_elapsed_time(None)
                    .build(),
            ),
        }
    }

    fn adjust(&self, base: Duration) -> Duration {
        match self.strategy {
            RateLimitStrategy::Adaptive => {
                let scale = 1.0 + 3.0 * self.transient_failure_ratio();
                base.mul_f64(scale).min(self.max_backoff)
            }
            RateLimitStrategy::Fixed | RateLimitStrategy::Backoff => base,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or retries are
    /// exhausted.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<Attempted<T>, Attempted<EngineError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut delays = self.delays();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let result = match timeout(self.task_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(self.task_timeout.as_secs())),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "operation succeeded after retries");
                    }
                    return Ok(Attempted { value, attempts: attempt });
                }
                Err(err) if err.is_transient() => {
                    self.stats.transient_failures.fetch_add(1, Ordering::Relaxed);
                    if attempt > self.max_retries {
                        warn!(attempts = attempt, error = %err, "retries exhausted");
                        return Err(Attempted { value: err, attempts: attempt });
                    }
                    let delay = self.adjust(delays.next_backoff().unwrap_or(self.max_backoff));
                    warn!(
                        attempt,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    debug!(error = %err, "permanent failure, not retrying");
                    return Err(Attempted { value: err, attempts: attempt });
                }
            }
        }
    }
}
