//! Error taxonomy for the guard service.
//!
//! Mirrors the split in the specification's error handling design: a small
//! set of variants are ever surfaced to an HTTP client (400/422/500/502),
//! everything else is caught inside the orchestrator and turned into a
//! fallback strategy or a `checks.ok = false` response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Coarse category used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request failed validation before any worker call was made.
    InvalidInput,
    /// The MT worker could not be reached or timed out.
    WorkerUnreachable,
    /// The worker responded but the circuit breaker judged the output unusable.
    WorkerBadOutput,
    /// Invariant validation failed after decode.
    InvariantLoss,
    /// A post-style filter produced output that failed re-validation.
    StyleDegrade,
    /// Configuration could not be parsed.
    Config,
    /// Anything else.
    Internal,
}

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("strict invariants failed: {0}")]
    StrictInvariantFailure(String),

    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    #[error("worker bad output: {0}")]
    WorkerBadOutput(String),

    #[error("invariant loss: {0}")]
    InvariantLoss(String),

    #[error("style filter degraded output: {0}")]
    StyleDegrade(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) => ErrorCategory::InvalidInput,
            Self::StrictInvariantFailure(_) => ErrorCategory::InvariantLoss,
            Self::WorkerUnreachable(_) => ErrorCategory::WorkerUnreachable,
            Self::WorkerBadOutput(_) => ErrorCategory::WorkerBadOutput,
            Self::InvariantLoss(_) => ErrorCategory::InvariantLoss,
            Self::StyleDegrade(_) => ErrorCategory::StyleDegrade,
            Self::Config(_) => ErrorCategory::Config,
            Self::Internal(_) => ErrorCategory::Internal,
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorCategory::WorkerUnreachable
                } else {
                    ErrorCategory::Internal
                }
            }
            Self::Json(_) | Self::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the worker client should retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::WorkerUnreachable)
    }

    /// HTTP status code this error should surface as, per the client-visible
    /// set `{400, 422, 500, 502}`.
    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCategory::InvariantLoss => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::WorkerUnreachable => StatusCode::BAD_GATEWAY,
            // WorkerBadOutput and StyleDegrade never reach the HTTP boundary;
            // they are caught per-strategy by the orchestrator. If one does
            // escape (a programming error), treat it as internal.
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = axum::Json(serde_json::json!({"error": self.to_string()}));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_maps_to_400() {
        let err = GuardError::InvalidInput("source 'auto' rejected".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert!(!err.is_retryable());
    }

    #[test]
    fn strict_failure_maps_to_422() {
        let err = GuardError::StrictInvariantFailure("missing_placeholders:2".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn worker_unreachable_maps_to_502_and_is_retryable() {
        let err = GuardError::WorkerUnreachable("connection refused".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_maps_to_500() {
        let err = GuardError::Internal("unexpected".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_retryable());
    }
}
