//! Typed errors for the dedup library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reconciling, grouping or deciding.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Empty URL, empty embedding set, mismatched dimensions and similar.
    ///
    /// Never retried.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// No usable merge verdict for a group.
    ///
    /// Raised internally by the decision service and converted to the
    /// KEEP_BOTH fallback; callers of `decide` never see it.
    #[error("decision unavailable for group {group_id}: {reason}")]
    DecisionUnavailable { group_id: usize, reason: String },

    /// Inference call failed after the retry policy gave up.
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Artifact missing from the content store
    #[error("artifact not found: {path}")]
    ArtifactNotFound { path: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Message bus publish failed
    #[error("message bus error: {0}")]
    Bus(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl DedupError {
    /// Shorthand for [`DedupError::InvalidInput`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

/// Errors returned by an inference service adapter.
///
/// Adapters classify failures themselves, so the retry loop never has to
/// inspect error text.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Rate or resource exhaustion (HTTP 429, RESOURCE_EXHAUSTED).
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// Temporary failure (5xx, connection reset).
    #[error("transient service error: {0}")]
    Transient(String),

    /// Malformed request, auth failure or any other non-retryable error.
    #[error("fatal service error: {0}")]
    Fatal(String),

    /// A single attempt exceeded the caller-supplied timeout.
    #[error("inference call timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered but the payload could not be turned into JSON.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Retryable failures kept happening until the retry budget ran out.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<InferenceError>,
    },
}

/// Coarse classification driving the retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Quota,
    Transient,
    Fatal,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Quota | ErrorKind::Transient)
    }
}

impl InferenceError {
    /// Classify this error for the retry loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Quota(_) => ErrorKind::Quota,
            InferenceError::Transient(_) | InferenceError::Timeout(_) => ErrorKind::Transient,
            InferenceError::Fatal(_)
            | InferenceError::MalformedResponse(_)
            | InferenceError::RetriesExhausted { .. } => ErrorKind::Fatal,
        }
    }
}

/// Result type alias for dedup operations.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Result type alias for inference operations.
pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(InferenceError::Quota("429".into()).kind(), ErrorKind::Quota);
        assert_eq!(
            InferenceError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(InferenceError::Fatal("401".into()).kind(), ErrorKind::Fatal);
        assert!(ErrorKind::Quota.should_retry());
        assert!(!ErrorKind::Fatal.should_retry());
    }

    #[test]
    fn test_inference_error_converts() {
        let err: DedupError = InferenceError::Fatal("bad request".into()).into();
        assert!(matches!(err, DedupError::Inference(InferenceError::Fatal(_))));
    }
}
