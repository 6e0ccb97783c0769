//! Closed error taxonomy for provider calls and dispatch outcomes.
//!
//! Adapters return [`ProviderError`]; the router turns the terminal outcome of
//! a dispatch into a [`GenerateError`]. Per-candidate failures never surface
//! on their own, they are kept as [`AttemptFailure`] diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure class reported by a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    QuotaExceeded,
    AuthFailed,
    AccessDenied,
    NotFound,
    Unavailable,
    Timeout,
    /// Malformed reply or a bug in the adapter
    Internal,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::AuthFailed => "auth_failed",
            ProviderErrorKind::AccessDenied => "access_denied",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::Unavailable => "unavailable",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::QuotaExceeded, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::AuthFailed, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::AccessDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Classify an HTTP failure status.
    pub fn from_status_code(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            429 => ProviderErrorKind::QuotaExceeded,
            401 => ProviderErrorKind::AuthFailed,
            403 => ProviderErrorKind::AccessDenied,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            500..=599 => ProviderErrorKind::Unavailable,
            _ => ProviderErrorKind::Internal,
        };

        Self {
            kind,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    #[cfg(feature = "http-adapter")]
    pub fn from_reqwest_error(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ProviderErrorKind::Timeout
        } else if error.is_connect() {
            ProviderErrorKind::Unavailable
        } else if error.is_decode() {
            ProviderErrorKind::Internal
        } else {
            ProviderErrorKind::Unavailable
        };

        Self {
            kind,
            message: error.to_string(),
            status_code: error.status().map(|s| s.as_u16()),
        }
    }
}

/// Flat, serialisable classification of a dispatch outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Throttled,
    AccessDenied,
    InvalidRequest,
    ProviderQuotaExceeded,
    ProviderAuthFailed,
    ProviderUnavailable,
    ModelNotFound,
    AllCandidatesExhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Throttled => "throttled",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ProviderQuotaExceeded => "provider_quota_exceeded",
            ErrorKind::ProviderAuthFailed => "provider_auth_failed",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::AllCandidatesExhausted => "all_candidates_exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::QuotaExceeded => ErrorKind::ProviderQuotaExceeded,
            ProviderErrorKind::AuthFailed => ErrorKind::ProviderAuthFailed,
            ProviderErrorKind::AccessDenied => ErrorKind::AccessDenied,
            ProviderErrorKind::NotFound => ErrorKind::ModelNotFound,
            ProviderErrorKind::Unavailable | ProviderErrorKind::Timeout => {
                ErrorKind::ProviderUnavailable
            }
            ProviderErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

/// One failed candidate inside a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub model_id: String,
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Terminal failure of a dispatch, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerateError {
    #[error("Rate limit exceeded for caller {caller_id}, retry in {retry_after_secs}s")]
    Throttled {
        caller_id: String,
        retry_after_secs: u64,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider quota exceeded: {0}")]
    ProviderQuotaExceeded(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("All {} candidates failed, last failure was {last_kind}: {message}", attempts.len())]
    AllCandidatesExhausted {
        last_kind: ProviderErrorKind,
        message: String,
        attempts: Vec<AttemptFailure>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::Throttled { .. } => ErrorKind::Throttled,
            GenerateError::AccessDenied(_) => ErrorKind::AccessDenied,
            GenerateError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GenerateError::ProviderQuotaExceeded(_) => ErrorKind::ProviderQuotaExceeded,
            GenerateError::ProviderAuthFailed(_) => ErrorKind::ProviderAuthFailed,
            GenerateError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            GenerateError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            GenerateError::AllCandidatesExhausted { .. } => ErrorKind::AllCandidatesExhausted,
            GenerateError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Most specific classification available. For an exhausted fallback
    /// chain this is the last provider's failure class.
    pub fn classification(&self) -> ErrorKind {
        match self {
            GenerateError::AllCandidatesExhausted { last_kind, .. } => (*last_kind).into(),
            other => other.kind(),
        }
    }

    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            GenerateError::AllCandidatesExhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Detected before any provider was invoked.
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            GenerateError::Throttled { .. }
                | GenerateError::AccessDenied(_)
                | GenerateError::InvalidRequest(_)
        )
    }

    /// Build the terminal error from the ordered list of failed attempts.
    pub fn exhausted(attempts: Vec<AttemptFailure>) -> Self {
        match attempts.last() {
            Some(last) => GenerateError::AllCandidatesExhausted {
                last_kind: last.kind,
                message: last.message.clone(),
                attempts,
            },
            None => GenerateError::Internal("dispatch finished without any attempt".to_string()),
        }
    }
}

impl From<ProviderError> for GenerateError {
    fn from(error: ProviderError) -> Self {
        match error.kind {
            ProviderErrorKind::QuotaExceeded => GenerateError::ProviderQuotaExceeded(error.message),
            ProviderErrorKind::AuthFailed => GenerateError::ProviderAuthFailed(error.message),
            ProviderErrorKind::AccessDenied => GenerateError::AccessDenied(error.message),
            ProviderErrorKind::NotFound => GenerateError::ModelNotFound(error.message),
            ProviderErrorKind::Unavailable | ProviderErrorKind::Timeout => {
                GenerateError::ProviderUnavailable(error.message)
            }
            ProviderErrorKind::Internal => GenerateError::Internal(error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(429, ProviderErrorKind::QuotaExceeded)]
    #[case(401, ProviderErrorKind::AuthFailed)]
    #[case(403, ProviderErrorKind::AccessDenied)]
    #[case(404, ProviderErrorKind::NotFound)]
    #[case(408, ProviderErrorKind::Timeout)]
    #[case(502, ProviderErrorKind::Unavailable)]
    #[case(503, ProviderErrorKind::Unavailable)]
    #[case(400, ProviderErrorKind::Internal)]
    fn test_status_code_classification(#[case] code: u16, #[case] expected: ProviderErrorKind) {
        let error = ProviderError::from_status_code(code, "boom");
        assert_eq!(error.kind, expected);
        assert_eq!(error.status_code, Some(code));
    }

    #[rstest]
    #[case(ProviderErrorKind::QuotaExceeded, ErrorKind::ProviderQuotaExceeded)]
    #[case(ProviderErrorKind::AuthFailed, ErrorKind::ProviderAuthFailed)]
    #[case(ProviderErrorKind::AccessDenied, ErrorKind::AccessDenied)]
    #[case(ProviderErrorKind::NotFound, ErrorKind::ModelNotFound)]
    #[case(ProviderErrorKind::Unavailable, ErrorKind::ProviderUnavailable)]
    #[case(ProviderErrorKind::Timeout, ErrorKind::ProviderUnavailable)]
    fn test_exhausted_classification_follows_last_attempt(
        #[case] last: ProviderErrorKind,
        #[case] expected: ErrorKind,
    ) {
        let attempts = vec![
            AttemptFailure {
                model_id: "a".into(),
                provider: "pa".into(),
                kind: ProviderErrorKind::Unavailable,
                message: "down".into(),
                elapsed_ms: 3,
            },
            AttemptFailure {
                model_id: "c".into(),
                provider: "pc".into(),
                kind: last,
                message: "last".into(),
                elapsed_ms: 5,
            },
        ];
        let error = GenerateError::exhausted(attempts);
        assert_eq!(error.kind(), ErrorKind::AllCandidatesExhausted);
        assert_eq!(error.classification(), expected);
        assert_eq!(error.attempts().len(), 2);
    }

    #[test]
    fn test_display_hides_per_candidate_reasons() {
        let error = GenerateError::exhausted(vec![
            AttemptFailure {
                model_id: "a".into(),
                provider: "pa".into(),
                kind: ProviderErrorKind::AuthFailed,
                message: "secret first reason".into(),
                elapsed_ms: 1,
            },
            AttemptFailure {
                model_id: "b".into(),
                provider: "pb".into(),
                kind: ProviderErrorKind::QuotaExceeded,
                message: "out of credits".into(),
                elapsed_ms: 1,
            },
        ]);
        let text = error.to_string();
        assert!(text.contains("quota_exceeded"));
        assert!(text.contains("out of credits"));
        assert!(!text.contains("secret first reason"));
    }

    #[test]
    fn test_pre_dispatch_errors() {
        assert!(GenerateError::InvalidRequest("empty".into()).is_pre_dispatch());
        assert!(GenerateError::Throttled {
            caller_id: "u".into(),
            retry_after_secs: 10
        }
        .is_pre_dispatch());
        assert!(!GenerateError::ProviderUnavailable("x".into()).is_pre_dispatch());
    }

    #[test]
    fn test_empty_exhaustion_is_internal() {
        assert_eq!(GenerateError::exhausted(Vec::new()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_provider_error_conversion() {
        let error: GenerateError = ProviderError::timeout("slow").into();
        assert_eq!(error.kind(), ErrorKind::ProviderUnavailable);
    }
}
