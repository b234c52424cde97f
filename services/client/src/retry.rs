//! Bounded-retry invocation.
//!
//! Every attempt runs under its own timeout. Failed attempts are followed by
//! the backoff's next delay until the attempt budget is spent, and the last
//! failure is what the caller sees. A [`CancellationToken`] covers the whole
//! loop, including the sleeps between attempts.

use crate::config::RetryConfig;
use crate::error::{InvokeError, Operation};
use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry loop for one outbound call
pub struct Retry<B = Constant> {
    config: RetryConfig,
    backoff: B,
}

impl Retry<Constant> {
    /// Fixed delay between attempts, taken from `config`
    pub fn new(config: RetryConfig) -> Self {
        Self {
            backoff: Constant::new(config.retry_delay()),
            config,
        }
    }
}

impl<B: Backoff> Retry<B> {
    pub fn with_backoff(config: RetryConfig, backoff: B) -> Self {
        Self { config, backoff }
    }

    /// Run `attempt` until it succeeds, the budget is spent or `cancel` fires.
    ///
    /// `attempt` receives the 1-based attempt number. Success on any attempt
    /// returns immediately. Failures are not classified: every error,
    /// including timeouts, consumes one attempt.
    pub async fn run<T, F, Fut>(
        mut self,
        operation: Operation,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, InvokeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let max_attempts = self.config.max_attempts;
        let timeout = self.config.attempt_timeout();
        let mut last_error = None;

        for number in 1..=max_attempts {
            debug!(%operation, attempt = number, max_attempts, "Sending request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InvokeError::Cancelled(operation)),
                outcome = tokio::time::timeout(timeout, attempt(number)) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(value)) => {
                    info!(%operation, attempt = number, "Request succeeded");
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => InvokeError::Timeout {
                    operation,
                    after: timeout,
                },
            };

            if failure.is_cancelled() {
                return Err(failure);
            }

            warn!(
                %operation,
                attempt = number,
                max_attempts,
                error = %failure,
                "Attempt failed"
            );
            last_error = Some(failure);

            if number == max_attempts {
                break;
            }

            let Some(delay) = self.backoff.next_backoff() else {
                break;
            };

            info!(%operation, delay_ms = delay.as_millis() as u64, "Retrying after delay");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(InvokeError::Cancelled(operation)),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        error!(%operation, max_attempts, "All attempts failed");

        Err(last_error.unwrap_or(InvokeError::Exhausted {
            operation,
            attempts: max_attempts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Zero;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn failure(attempt: u32) -> InvokeError {
        InvokeError::Status {
            operation: Operation::Detection,
            status: 500,
            body: format!("attempt {attempt}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = calls.clone();
        let result = Retry::new(RetryConfig::detection())
            .run(Operation::Detection, &CancellationToken::new(), |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(failure(attempt))
                    } else {
                        Ok("ingredients")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ingredients");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = Retry::new(RetryConfig::detection())
            .run(Operation::Detection, &CancellationToken::new(), |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, InvokeError>(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), _> = Retry::new(RetryConfig::detection())
            .run(Operation::Detection, &CancellationToken::new(), |attempt| async move {
                Err(failure(attempt))
            })
            .await;

        match result {
            Err(InvokeError::Status { body, .. }) => assert_eq!(body, "attempt 3"),
            other => panic!("Expected last status error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 2,
            retry_delay_ms: 0,
            attempt_timeout_secs: 600,
        };

        let counter = calls.clone();
        let result: Result<(), _> = Retry::with_backoff(config, Zero {})
            .run(Operation::Detection, &CancellationToken::new(), |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(900)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(InvokeError::Timeout { after, .. }) if after == Duration::from_secs(600)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_stops_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let counter = calls.clone();
        let result: Result<(), _> = Retry::new(RetryConfig::detection())
            .run(Operation::Detection, &cancel, |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(failure(attempt))
                }
            })
            .await;

        assert!(matches!(result, Err(InvokeError::Cancelled(Operation::Detection))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = Retry::new(RetryConfig::generation())
            .run(Operation::Generation, &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_zero_attempts_is_exhausted() {
        let config = RetryConfig {
            max_attempts: 0,
            retry_delay_ms: 0,
            attempt_timeout_secs: 1,
        };

        let result: Result<(), _> = Retry::with_backoff(config, Zero {})
            .run(Operation::Generation, &CancellationToken::new(), |_| async {
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(InvokeError::Exhausted { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = Retry::with_backoff(RetryConfig::generation(), Zero {})
            .run(Operation::Generation, &CancellationToken::new(), |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(failure(attempt))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
