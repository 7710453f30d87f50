//! Error responses.
//!
//! # Responsibilities
//! - Map gateway failures to HTTP status codes and stable error codes
//! - Render the error envelope with the request's correlation ID
//!
//! # Envelope
//! ```json
//! {"error": {"code": "REQUEST_TIMEOUT", "message": "...",
//!            "correlationId": "...", "timestamp": "...", "retryable": true}}
//! ```

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::request::X_CORRELATION_ID;

/// Everything the gateway can answer instead of a handler response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No route matches {method} {path}")]
    NotFound { method: String, path: String },

    #[error("Service {0} is temporarily unavailable")]
    CircuitOpen(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    /// Resource-level lookup miss raised by admin handlers.
    #[error("{0}")]
    Missing(String),

    #[error("{0}")]
    IntegrityViolation(String),

    /// Client error produced by a business handler, passed through as is.
    #[error("{message}")]
    Client {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } | GatewayError::Missing(_) => StatusCode::NOT_FOUND,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::IntegrityViolation(_) => StatusCode::CONFLICT,
            GatewayError::Client { status, .. } => *status,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            GatewayError::NotFound { .. } | GatewayError::Missing(_) => "NOT_FOUND",
            GatewayError::CircuitOpen(_) => "SERVICE_CIRCUIT_OPEN",
            GatewayError::Timeout(_) => "REQUEST_TIMEOUT",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            GatewayError::Client { code, .. } => code.as_str(),
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn retryable(&self) -> bool {
        matches!(self, GatewayError::CircuitOpen(_) | GatewayError::Timeout(_))
    }

    /// Attach the correlation ID and timestamp the response will carry.
    pub fn with_correlation(
        self,
        correlation_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> ApiError {
        ApiError {
            error: self,
            correlation_id: correlation_id.into(),
            timestamp,
        }
    }
}

/// Serialized body of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
}

/// A `GatewayError` bound to its request.
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.error.code().to_string(),
                message: self.error.to_string(),
                correlation_id: self.correlation_id.clone(),
                timestamp: self.timestamp,
                retryable: self.error.retryable(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let mut response = (status, Json(self.envelope())).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
            response.headers_mut().insert(X_CORRELATION_ID, value);
        }
        response
    }
}
