//! Retry/backoff state machine over an [`InferenceService`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{DedupError, ErrorKind, InferenceError, InferenceResult, Result};
use crate::inference::json::parse_response;
use crate::traits::inference::{InferenceRequest, InferenceService};
use crate::types::config::RetryPolicy;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Retrying,
    Succeeded,
    Failed,
}

/// Retry bookkeeping for a single call. Never shared between calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCallState {
    /// 0-indexed attempt currently in flight (or last made)
    pub attempt: u32,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub last_error_kind: Option<ErrorKind>,
    pub status: CallStatus,
}

impl BatchCallState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_retries: policy.max_retries,
            base_delay: policy.base_delay(),
            last_error_kind: None,
            status: CallStatus::Pending,
        }
    }

    /// Record a failed attempt and move to `Retrying` or `Failed`.
    pub fn record_failure(&mut self, err: &InferenceError) -> CallStatus {
        let kind = err.kind();
        self.last_error_kind = Some(kind);
        self.status = if kind.should_retry() && self.attempt < self.max_retries {
            CallStatus::Retrying
        } else {
            CallStatus::Failed
        };
        self.status
    }

    /// Record a successful attempt.
    pub fn record_success(&mut self) {
        self.status = CallStatus::Succeeded;
    }

    /// Total attempts made so far.
    pub fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }
}

/// Calls an inference service with retries, per-attempt timeouts and an
/// optional shared rate ceiling.
///
/// Quota and transient failures (timeouts included) are retried up to
/// `max_retries` times with exponential backoff. Fatal failures and
/// unparsable responses fail at once.
pub struct BatchInferenceClient<S> {
    service: S,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultRateLimiter>>,
}

impl<S: InferenceService> BatchInferenceClient<S> {
    /// Create a client. Fails if the policy asks for a zero rate.
    pub fn new(service: S, policy: RetryPolicy) -> Result<Self> {
        let limiter = match policy.requests_per_second {
            Some(rps) => {
                let rps = NonZeroU32::new(rps).ok_or_else(|| {
                    DedupError::Config("requests_per_second must be > 0".into())
                })?;
                Some(Arc::new(RateLimiter::direct(Quota::per_second(rps))))
            }
            None => None,
        };

        Ok(Self {
            service,
            policy,
            limiter,
        })
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Access the underlying service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Run a request to completion and return the parsed JSON object.
    pub async fn call(&self, request: &InferenceRequest) -> InferenceResult<Value> {
        self.call_with_state(request).await.0
    }

    /// Like [`call`](Self::call), also returning the final call state.
    pub async fn call_with_state(
        &self,
        request: &InferenceRequest,
    ) -> (InferenceResult<Value>, BatchCallState) {
        let mut state = BatchCallState::new(&self.policy);
        let call_timeout = self.policy.call_timeout();

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let outcome = tokio::time::timeout(call_timeout, self.service.generate(request))
                .await
                .unwrap_or(Err(InferenceError::Timeout(call_timeout)))
                .and_then(parse_response);

            let err = match outcome {
                Ok(value) => {
                    state.record_success();
                    debug!(attempts = state.attempts_made(), "inference call succeeded");
                    return (Ok(value), state);
                }
                Err(err) => err,
            };

            match state.record_failure(&err) {
                CallStatus::Retrying => {
                    let delay = self.policy.delay_for(state.attempt);
                    warn!(
                        attempt = state.attempt,
                        max_retries = state.max_retries,
                        kind = ?err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "inference call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    state.attempt += 1;
                }
                _ => {
                    let attempts = state.attempts_made();
                    error!(attempts, kind = ?err.kind(), error = %err, "inference call failed");
                    let err = if err.kind().should_retry() {
                        InferenceError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    };
                    return (Err(err), state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockInference;
    use crate::traits::inference::InferenceResponse;
    use serde_json::json;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(3)
            .with_base_delay(Duration::from_secs(10))
            .with_call_timeout(Duration::from_secs(120))
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new("decide")
    }

    #[test]
    fn test_state_transitions() {
        let mut state = BatchCallState::new(&policy());
        assert_eq!(state.status, CallStatus::Pending);

        assert_eq!(
            state.record_failure(&InferenceError::Quota("429".into())),
            CallStatus::Retrying
        );
        assert_eq!(policy().delay_for(state.attempt), Duration::from_secs(10));
        state.attempt = 3;
        assert_eq!(policy().delay_for(state.attempt), Duration::from_secs(80));
        assert_eq!(
            state.record_failure(&InferenceError::Transient("503".into())),
            CallStatus::Failed
        );
    }

    #[test]
    fn test_fatal_fails_immediately() {
        let mut state = BatchCallState::new(&policy());
        assert_eq!(
            state.record_failure(&InferenceError::Fatal("400".into())),
            CallStatus::Failed
        );
        assert_eq!(state.last_error_kind, Some(ErrorKind::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let mock = MockInference::new()
            .then_error(InferenceError::Quota("429".into()))
            .then_error(InferenceError::Transient("503".into()))
            .then_respond(InferenceResponse::Structured(json!({"decisions": []})));
        let client = BatchInferenceClient::new(mock.clone(), policy()).unwrap();

        let start = Instant::now();
        let (result, state) = client.call_with_state(&request()).await;

        assert_eq!(result.unwrap(), json!({"decisions": []}));
        assert_eq!(state.status, CallStatus::Succeeded);
        assert_eq!(state.attempts_made(), 3);
        assert_eq!(mock.call_count(), 3);
        // 10s + 20s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_bound() {
        let mock = MockInference::new().always_error(|| InferenceError::Quota("429".into()));
        let client = BatchInferenceClient::new(mock.clone(), policy()).unwrap();

        let start = Instant::now();
        let (result, state) = client.call_with_state(&request()).await;

        assert!(matches!(
            result,
            Err(InferenceError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(state.status, CallStatus::Failed);
        assert_eq!(mock.call_count(), 4);
        // 10 + 20 + 40
        assert_eq!(start.elapsed(), Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let mock = MockInference::new().then_error(InferenceError::Fatal("401".into()));
        let client = BatchInferenceClient::new(mock.clone(), policy()).unwrap();

        let result = client.call(&request()).await;

        assert!(matches!(result, Err(InferenceError::Fatal(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let mock = MockInference::new()
            .then_hang()
            .then_respond(InferenceResponse::RawText("```json\n{\"ok\": true}\n```".into()));
        let client = BatchInferenceClient::new(mock.clone(), policy()).unwrap();

        let start = Instant::now();
        let (result, state) = client.call_with_state(&request()).await;

        assert_eq!(result.unwrap(), json!({"ok": true}));
        assert_eq!(state.last_error_kind, Some(ErrorKind::Transient));
        assert_eq!(start.elapsed(), Duration::from_secs(130));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_text_is_not_retried() {
        let mock = MockInference::new()
            .then_respond(InferenceResponse::RawText("no json here".into()));
        let client = BatchInferenceClient::new(mock.clone(), policy()).unwrap();

        let result = client.call(&request()).await;

        assert!(matches!(result, Err(InferenceError::MalformedResponse(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let policy = RetryPolicy {
            requests_per_second: Some(0),
            ..RetryPolicy::default()
        };
        assert!(BatchInferenceClient::new(MockInference::new(), policy).is_err());
    }
}
