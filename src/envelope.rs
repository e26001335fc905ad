//! Structured error envelope returned to API clients
//!
//! Every failure path that reaches the transport layer is rendered as
//! `{ code, message, details?, retryAfter? }` with a status derived from the code.

use crate::upstream::{ErrorKind, FailureClass, UpstreamFailure};
use crate::Error;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    ParseError,
    RateLimited,
    RpcError,
    ContractError,
    SimulationFailed,
    InsufficientBalance,
    GasEstimationFailed,
    PolicyViolation,
    InternalError,
    ServiceUnavailable,
    Timeout,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest
            | ErrorCode::ValidationError
            | ErrorCode::ParseError
            | ErrorCode::PolicyViolation
            | ErrorCode::InsufficientBalance => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RpcError | ErrorCode::ContractError | ErrorCode::GasEstimationFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::SimulationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// API error envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn policy_violation(violations: &[String]) -> Self {
        Self::new(ErrorCode::PolicyViolation, "Policy violation")
            .with_details(json!({ "violations": violations }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(service: &str) -> Self {
        Self::new(
            ErrorCode::ServiceUnavailable,
            format!("{} is temporarily unavailable", service),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    /// Propagation class, used to pick the log level
    pub fn class(&self) -> FailureClass {
        match self.code {
            ErrorCode::PolicyViolation => FailureClass::PolicyViolation,
            ErrorCode::RateLimited | ErrorCode::Timeout | ErrorCode::ServiceUnavailable => {
                FailureClass::Transient
            }
            _ => FailureClass::Permanent,
        }
    }
}

impl ErrorKind {
    pub fn error_code(&self, message: &str) -> ErrorCode {
        match self {
            ErrorKind::RateLimited => ErrorCode::RateLimited,
            ErrorKind::InsufficientBalance => ErrorCode::InsufficientBalance,
            ErrorKind::SimulationFailed => ErrorCode::SimulationFailed,
            ErrorKind::ContractError => ErrorCode::ContractError,
            ErrorKind::NetworkError => {
                let lower = message.to_lowercase();
                if lower.contains("timeout") || lower.contains("timed out") {
                    ErrorCode::Timeout
                } else {
                    ErrorCode::RpcError
                }
            }
            ErrorKind::UpstreamError => ErrorCode::RpcError,
        }
    }
}

impl From<&UpstreamFailure> for ApiError {
    fn from(failure: &UpstreamFailure) -> Self {
        let kind = failure.kind();
        let code = kind.error_code(&failure.message);
        let message = match kind {
            ErrorKind::RateLimited => "Too many requests".to_string(),
            ErrorKind::SimulationFailed => format!("Simulation failed: {}", failure.message),
            _ => failure.message.clone(),
        };
        Self {
            code,
            message,
            details: None,
            retry_after: failure.retry_after,
        }
    }
}

impl From<UpstreamFailure> for ApiError {
    fn from(failure: UpstreamFailure) -> Self {
        Self::from(&failure)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Upstream(failure) => failure.into(),
            Error::Policy(e) => ApiError::validation(e.to_string()),
            Error::InvalidArgument(msg) => ApiError::bad_request(msg),
            Error::Proof(e) => ApiError::new(ErrorCode::ParseError, e.to_string()),
            Error::Json(e) => ApiError::new(ErrorCode::ParseError, e.to_string()),
            Error::Cancelled(_) => ApiError::service_unavailable("Upstream"),
            other => {
                tracing::error!(error = %other, "Internal error");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.class() {
            FailureClass::Transient => {
                tracing::warn!(code = ?self.code, message = %self.message, "Transient failure surfaced")
            }
            class => {
                tracing::debug!(code = ?self.code, ?class, message = %self.message, "Request failed")
            }
        }
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
