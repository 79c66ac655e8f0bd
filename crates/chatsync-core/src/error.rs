use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid configuration or a request the server rejected as malformed.
    Config,
    /// Missing, expired or rejected bearer credential.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited or timed out by the server.
    RateLimited,
    /// Local input rejected before any network call.
    Validation,
    /// Response body could not be decoded.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload crossing the engine/runtime boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// No bearer credential is available for this session.
    pub fn no_session() -> Self {
        Self::new(SyncErrorCategory::Auth, "no_session", "no session credential")
    }

    /// Draft had blank text and no attachment.
    pub fn empty_message() -> Self {
        Self::new(
            SyncErrorCategory::Validation,
            "empty_message",
            "message needs text or an attachment",
        )
    }

    /// An action that targets the active conversation ran with none selected.
    pub fn no_active_conversation(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Validation,
            "no_active_conversation",
            format!("cannot run '{action}' without an active conversation"),
        )
    }

    /// Request/response call failed before a usable response arrived.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCategory::Network, "transport_failure", message)
    }

    /// Response arrived but could not be decoded.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCategory::Serialization, "invalid_response", message)
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            SyncErrorCategory::Network | SyncErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        401 | 403 => SyncErrorCategory::Auth,
        408 | 429 => SyncErrorCategory::RateLimited,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), SyncErrorCategory::Auth);
        assert_eq!(classify_http_status(429), SyncErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), SyncErrorCategory::Config);
        assert_eq!(classify_http_status(503), SyncErrorCategory::Network);
        assert_eq!(classify_http_status(700), SyncErrorCategory::Internal);
    }

    #[test]
    fn keeps_validation_error_codes_stable() {
        assert_eq!(SyncError::empty_message().code, "empty_message");
        let err = SyncError::no_active_conversation("send_message");
        assert_eq!(err.code, "no_active_conversation");
        assert_eq!(err.category, SyncErrorCategory::Validation);
    }

    #[test]
    fn only_transport_and_rate_limit_failures_are_retryable() {
        assert!(SyncError::transport("reset").is_retryable());
        assert!(
            SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "slow").is_retryable()
        );
        assert!(!SyncError::no_session().is_retryable());
        assert!(!SyncError::invalid_response("bad json").is_retryable());
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(err.retry_after_ms, Some(3000));
    }
}
