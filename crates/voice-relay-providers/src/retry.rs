//! Bounded retries with exponential backoff for a single operation.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use tracing::{debug, info, warn};

use voice_relay_core::backoff::RetryConfig;
use voice_relay_core::error::ProviderError;

/// Result of one [`RetryExecutor`] run.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Attempts made, including the first.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
        }
    }
}

/// Runs an operation until it succeeds, hits a non-retryable error, or
/// uses up `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry provider calls using [`ProviderError::is_retryable`].
    pub async fn run<T, F, Fut>(&self, operation_name: &str, operation: F) -> RetryOutcome<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute(operation_name, operation, ProviderError::is_retryable)
            .await
    }

    /// Retry with a caller-supplied retryability predicate.
    ///
    /// The backoff sleep is a tokio timer, so other tasks keep running while
    /// this one waits.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        operation_name: &str,
        mut operation: F,
        should_retry: P,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();

            match operation().await {
                Ok(value) => {
                    let elapsed_ms = attempt_started.elapsed().as_millis() as u64;
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            total_ms = started.elapsed().as_millis() as u64,
                            "Succeeded after retry"
                        );
                    } else {
                        debug!(operation = operation_name, attempt, elapsed_ms, "Succeeded");
                    }
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let elapsed_ms = attempt_started.elapsed().as_millis() as u64;

                    if !should_retry(&error) {
                        warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            %error,
                            "Non-retryable error, not retrying"
                        );
                        return RetryOutcome::Exhausted {
                            error,
                            attempts: attempt,
                        };
                    }

                    if attempt >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempt,
                            max_attempts,
                            total_ms = started.elapsed().as_millis() as u64,
                            %error,
                            "All attempts failed"
                        );
                        return RetryOutcome::Exhausted {
                            error,
                            attempts: attempt,
                        };
                    }

                    let delay = self.config.delay_for(attempt - 1);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        elapsed_ms,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(100), Duration::from_secs(1))
            .without_jitter()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_makes_exactly_n_attempts() {
        for n in 1..=5 {
            let calls = Arc::new(AtomicU32::new(0));
            let executor = RetryExecutor::new(config(n));
            let outcome: RetryOutcome<(), _> = executor
                .run("always-503", || {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(ProviderError::Http {
                            status: 503,
                            body: "unavailable".into(),
                        })
                    }
                })
                .await;
            assert!(!outcome.is_success());
            assert_eq!(outcome.attempts(), n);
            assert_eq!(calls.load(Ordering::SeqCst), n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(config(5));
        let outcome: RetryOutcome<(), _> = executor
            .run("bad-key", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Other("HTTP 401 Unauthorized".into()))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(config(3));
        let outcome = executor
            .run("flaky", || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Connection("reset".into()))
                    } else {
                        Ok("hello")
                    }
                }
            })
            .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result().unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_follow_backoff() {
        let executor = RetryExecutor::new(config(3));
        let started = tokio::time::Instant::now();
        let _: RetryOutcome<(), _> = executor
            .run("timing", || async { Err(ProviderError::Timeout("slow".into())) })
            .await;
        // 100ms after the first failure, 200ms after the second, none after the last.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let executor = RetryExecutor::new(config(4));
        let outcome: RetryOutcome<(), &str> = executor
            .execute("custom", || async { Err("nope") }, |_| true)
            .await;
        assert_eq!(outcome.attempts(), 4);
    }
}
