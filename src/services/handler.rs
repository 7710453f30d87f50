//! Business handler boundary.
//!
//! Handlers receive `(request, correlation_id)` and return a response or an
//! error. The gateway never looks inside them; it only classifies the error
//! for the circuit breaker.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::routing::PathParams;
use crate::security::Principal;

/// Request as seen by a business handler.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub params: PathParams,
    pub headers: HeaderMap,
    /// Parsed JSON body, `Null` when empty.
    pub body: Value,
    pub principal: Option<Principal>,
}

/// Handler response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ServiceResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn created(body: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }

    pub fn with_status(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

/// Handler failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Caller mistake. Passed through, not a dependency failure.
    #[error("{message}")]
    Client {
        status: StatusCode,
        code: String,
        message: String,
    },

    /// The service itself failed.
    #[error("{0}")]
    Server(String),

    /// The service could not be reached.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Client {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Client {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }

    /// Whether this error should count against the service's circuit.
    pub fn is_dependency_failure(&self) -> bool {
        !matches!(self, HandlerError::Client { .. })
    }
}

#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(
        &self,
        request: ServiceRequest,
        correlation_id: &str,
    ) -> Result<ServiceResponse, HandlerError>;
}

/// Adapts an async closure into a `ServiceHandler`.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ServiceHandler for FnHandler<F>
where
    F: Fn(ServiceRequest, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ServiceResponse, HandlerError>> + Send,
{
    async fn handle(
        &self,
        request: ServiceRequest,
        correlation_id: &str,
    ) -> Result<ServiceResponse, HandlerError> {
        (self.0)(request, correlation_id.to_string()).await
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(ServiceRequest, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers by service name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `service`.
    pub fn register(&mut self, service: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(service.into(), handler);
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(service).cloned()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.handlers.contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
