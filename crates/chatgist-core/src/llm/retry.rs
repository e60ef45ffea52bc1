//! Retry engine for model calls.
//!
//! Wraps one logical call with exponential backoff (`base * 2^attempt`),
//! classifies provider errors into retryable / quota / fatal, honours a
//! provider-supplied retry-after, and bounds every attempt by the smaller of
//! the configured attempt timeout and the operation deadline.

use std::future::Future;
use std::time::Duration;

use chatgist_types::config::RetryConfig;
use chatgist_types::error::GistError;
use chatgist_types::llm::ProviderError;
use thiserror::Error;
use tokio::time::Instant;

use crate::context::{Interrupted, OperationContext};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }

    /// Delay before the retry that follows `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    /// Credential quota is spent; retrying with the same key is pointless.
    Quota,
    Fatal,
}

pub fn classify(err: &ProviderError) -> ErrorClass {
    match err {
        ProviderError::DeadlineExceeded
        | ProviderError::RateLimited { .. }
        | ProviderError::Overloaded(_)
        | ProviderError::NoChoices => ErrorClass::Retryable,
        ProviderError::Http { status, .. } => match status {
            429 | 502 | 503 => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        },
        ProviderError::ResourceExhausted { .. } => ErrorClass::Quota,
        // Some SDKs only surface a message; fall back to its text.
        ProviderError::Provider { message } => classify_message(message),
        ProviderError::AuthenticationFailed
        | ProviderError::InvalidRequest(_)
        | ProviderError::Deserialization(_) => ErrorClass::Fatal,
    }
}

fn classify_message(message: &str) -> ErrorClass {
    if message.contains("RESOURCE_EXHAUSTED") {
        ErrorClass::Quota
    } else if ["429", "502", "503", "no choices in completion"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        ErrorClass::Retryable
    } else {
        ErrorClass::Fatal
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Successful result of a retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    /// Wall time of the whole operation, backoff included.
    pub elapsed: Duration,
    pub attempts: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum RetryError {
    #[error("quota exhausted: {0}")]
    QuotaExhausted(ProviderError),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: ProviderError },

    #[error("non-retryable error on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    Expired,
}

impl From<Interrupted> for RetryError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => RetryError::Cancelled,
            Interrupted::Expired => RetryError::Expired,
        }
    }
}

impl RetryError {
    pub fn into_gist_error(self, operation: &'static str) -> GistError {
        match self {
            RetryError::QuotaExhausted(source) | RetryError::Fatal { source, .. } => {
                GistError::Model { operation, source }
            }
            RetryError::MaxRetriesExceeded { attempts, last } => GistError::MaxRetriesExceeded {
                operation,
                attempts,
                source: last,
            },
            RetryError::Cancelled => GistError::Cancelled { operation },
            RetryError::Expired => GistError::DeadlineExceeded { operation },
        }
    }
}

/// Run `call` until it succeeds, fails fatally, exhausts quota, runs out of
/// attempts, or the context stops.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &OperationContext,
    mut call: F,
) -> Result<Retried<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        ctx.check()?;
        let budget = ctx.bound(policy.attempt_timeout);

        let outcome = tokio::select! {
            biased;
            _ = ctx.token().cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(budget, call()) => outcome,
        };

        let err = match outcome {
            Ok(Ok(value)) => {
                let elapsed = started.elapsed();
                tracing::debug!(
                    attempts = attempt + 1,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Model call succeeded"
                );
                return Ok(Retried {
                    value,
                    elapsed,
                    attempts: attempt + 1,
                });
            }
            Ok(Err(err)) => err,
            Err(_) => ProviderError::DeadlineExceeded,
        };

        match classify(&err) {
            ErrorClass::Quota => return Err(RetryError::QuotaExhausted(err)),
            ErrorClass::Fatal => {
                tracing::error!(attempt = attempt + 1, error = %err, "Non-retryable model error");
                return Err(RetryError::Fatal {
                    attempts: attempt + 1,
                    source: err,
                });
            }
            ErrorClass::Retryable => {}
        }

        if attempt >= policy.max_retries {
            return Err(RetryError::MaxRetriesExceeded {
                attempts: attempt + 1,
                last: err,
            });
        }

        let delay = err.retry_after().unwrap_or_else(|| policy.backoff(attempt));
        tracing::warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying model call"
        );
        ctx.sleep(delay).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    fn too_many_requests() -> ProviderError {
        ProviderError::Http {
            status: 429,
            message: "Too Many Requests".into(),
            retry_after_ms: None,
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = policy(7);
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(6), Duration::from_secs(64));
        // Saturates instead of overflowing.
        assert!(p.backoff(64) >= p.backoff(31));
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify(&too_many_requests()), ErrorClass::Retryable);
        assert_eq!(classify(&ProviderError::NoChoices), ErrorClass::Retryable);
        assert_eq!(classify(&ProviderError::DeadlineExceeded), ErrorClass::Retryable);
        assert_eq!(
            classify(&ProviderError::Http {
                status: 400,
                message: "bad".into(),
                retry_after_ms: None
            }),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&ProviderError::ResourceExhausted {
                message: "quota".into()
            }),
            ErrorClass::Quota
        );
        assert_eq!(
            classify(&ProviderError::Provider {
                message: "upstream said 503 Service Unavailable".into()
            }),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&ProviderError::Provider {
                message: "status RESOURCE_EXHAUSTED".into()
            }),
            ErrorClass::Quota
        );
        assert_eq!(classify(&ProviderError::AuthenticationFailed), ErrorClass::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rate_limit_makes_max_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();
        let started = Instant::now();

        let result: Result<Retried<()>, _> = retry(&policy(7), &ctx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(too_many_requests()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 8, .. })
        ));
        // 1 + 2 + 4 + ... + 64 seconds of backoff.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(127));
        assert!(waited < Duration::from_secs(128));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();

        let result: Result<Retried<()>, _> = retry(&policy(7), &ctx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::AuthenticationFailed) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_backoff() {
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();

        let result = retry(&policy(3), &ctx, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProviderError::RateLimited {
                        retry_after_ms: Some(5_000),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 2);
        assert!(result.elapsed >= Duration::from_secs(5));
        assert!(result.elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_is_surfaced_without_retrying() {
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();

        let result: Result<Retried<()>, _> = retry(&policy(7), &ctx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::ResourceExhausted {
                    message: "daily limit".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::QuotaExhausted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let ctx = OperationContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            canceller.cancel();
        });
        let started = Instant::now();

        let result: Result<Retried<()>, _> =
            retry(&policy(7), &ctx, || async { Err(too_many_requests()) }).await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();
        let p = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(2),
        };

        let result: Result<Retried<()>, _> = retry(&p, &ctx, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result,
            Err(RetryError::MaxRetriesExceeded {
                attempts: 2,
                last: ProviderError::DeadlineExceeded
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn operation_deadline_caps_retrying() {
        let ctx = OperationContext::new().with_timeout(Duration::from_secs(10));

        let result: Result<Retried<()>, _> =
            retry(&policy(7), &ctx, || async { Err(too_many_requests()) }).await;

        assert_eq!(result, Err(RetryError::Expired));
    }
}
