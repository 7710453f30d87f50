//! Correlation ID handling.
//!
//! # Responsibilities
//! - Reuse a well-formed inbound `x-correlation-id`, otherwise mint a UUID v4
//! - Make the ID available to handlers as a request extension
//! - Echo the ID on every response, errors included
//!
//! # Design Decisions
//! - Inbound IDs are accepted only if they are short visible ASCII, so the
//!   echoed header is always valid and log lines stay bounded

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::fmt;
use uuid::Uuid;

pub const X_CORRELATION_ID: &str = "x-correlation-id";

const MAX_INBOUND_LEN: usize = 128;

/// Per-request correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The inbound ID, if present and well-formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(X_CORRELATION_ID)?.to_str().ok()?.trim();
        let well_formed = !raw.is_empty()
            && raw.len() <= MAX_INBOUND_LEN
            && raw.bytes().all(|b| b.is_ascii_graphic());
        well_formed.then(|| Self(raw.to_string()))
    }

    /// Inbound ID or a fresh one.
    pub fn resolve(headers: &HeaderMap) -> Self {
        Self::from_headers(headers).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the correlation ID attached by `correlation_middleware`.
pub trait CorrelationIdExt {
    fn correlation_id(&self) -> Option<&CorrelationId>;
}

impl<B> CorrelationIdExt for Request<B> {
    fn correlation_id(&self) -> Option<&CorrelationId> {
        self.extensions().get::<CorrelationId>()
    }
}

/// Assign the correlation ID before anything else runs and echo it back.
pub async fn correlation_middleware(mut request: Request<Body>, next: Next) -> Response {
    let id = CorrelationId::resolve(request.headers());
    let header = HeaderValue::from_str(id.as_str()).ok();

    if let Some(value) = &header {
        request.headers_mut().insert(X_CORRELATION_ID, value.clone());
    }
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}
