//! Retry with exponential backoff for transient LLM failures.
//!
//! The engine never retries; it wraps its client in [`RetryingClient`] and
//! sees either a success or the final error once attempts are exhausted.

use crate::client::{LlmClient, LlmError, LlmResult};
use crate::types::{LlmRequest, LlmResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Random jitter fraction in [0.0, 1.0].
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
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

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for the given zero-based attempt, with jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let exponential = base * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range - jitter_range / 2.0;
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Wraps any [`LlmClient`] with the retry policy. Non-transient errors are
/// returned immediately; rate limits honor the server-provided delay.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl LlmClient for RetryingClient {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.policy.max_attempts {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !err.is_transient() {
                        return Err(err);
                    }
                    let delay = match err {
                        LlmError::RateLimited { retry_after_ms } => {
                            Duration::from_millis(retry_after_ms)
                        }
                        _ => self.policy.delay_for(attempt),
                    };
                    last_error = Some(err);

                    if attempt + 1 < self.policy.max_attempts {
                        debug!(attempt, ?delay, "llm call failed, retrying");
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed("no attempts made".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssistantMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmClient for FlakyClient {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: LlmRequest) -> LlmResult<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(LlmError::Timeout(10))
            } else {
                Ok(LlmResponse {
                    message: AssistantMessage::default(),
                    metrics: Default::default(),
                })
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter_factor(0.0)
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_jitter_factor(0.0);
        assert!(policy.delay_for(1) > policy.delay_for(0));
        assert!(policy.delay_for(2) > policy.delay_for(1));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let client = RetryingClient::new(
            Arc::new(FlakyClient {
                failures: 2,
                calls: AtomicUsize::new(0),
            }),
            fast_policy(),
        );
        let result = client.complete(LlmRequest::new(Vec::new())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let client = RetryingClient::new(
            Arc::new(FlakyClient {
                failures: 10,
                calls: AtomicUsize::new(0),
            }),
            fast_policy(),
        );
        let err = client
            .complete(LlmRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        struct AuthFail(AtomicUsize);

        #[async_trait::async_trait]
        impl LlmClient for AuthFail {
            fn model(&self) -> &str {
                "auth-fail"
            }
            async fn complete(&self, _request: LlmRequest) -> LlmResult<LlmResponse> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::AuthFailed("bad key".into()))
            }
        }

        let inner = Arc::new(AuthFail(AtomicUsize::new(0)));
        let client = RetryingClient::new(inner.clone(), fast_policy());
        let err = client
            .complete(LlmRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }
}
