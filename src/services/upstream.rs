//! HTTP upstream handler.
//!
//! # Responsibilities
//! - Forward a `ServiceRequest` to a configured backend base URL
//! - Propagate the correlation ID and caller identity headers
//! - Translate the backend response back into JSON
//!
//! # Design Decisions
//! - Upstream status codes are passed through; the gateway classifies them
//! - Connection errors become `HandlerError::Upstream`
//! - Non-JSON bodies are wrapped as a JSON string

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use url::Url;

use crate::http::request::X_CORRELATION_ID;
use crate::services::handler::{HandlerError, ServiceHandler, ServiceRequest, ServiceResponse};

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

pub struct UpstreamHandler {
    base_url: Url,
    client: Client<HttpConnector, Body>,
}

impl UpstreamHandler {
    pub fn new(base_url: Url) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { base_url, client }
    }

    fn target(&self, request: &ServiceRequest) -> Result<Uri, HandlerError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let uri = match &request.query {
            Some(q) => format!("{base}{}?{q}", request.path),
            None => format!("{base}{}", request.path),
        };
        uri.parse()
            .map_err(|e| HandlerError::Server(format!("invalid upstream uri '{uri}': {e}")))
    }
}

#[async_trait]
impl ServiceHandler for UpstreamHandler {
    async fn handle(
        &self,
        request: ServiceRequest,
        correlation_id: &str,
    ) -> Result<ServiceResponse, HandlerError> {
        let uri = self.target(&request)?;

        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .header(header::ACCEPT, "application/json");

        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            builder = builder.header(X_CORRELATION_ID, value);
        }
        if let Some(principal) = &request.principal {
            if let Ok(id) = HeaderValue::from_str(&principal.id) {
                builder = builder.header("x-actor-id", id);
            }
            if let Ok(role) = HeaderValue::from_str(&principal.role) {
                builder = builder.header("x-actor-role", role);
            }
        }

        let body = if request.body.is_null() {
            Body::empty()
        } else {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            let bytes = serde_json::to_vec(&request.body)
                .map_err(|e| HandlerError::Server(e.to_string()))?;
            Body::from(bytes)
        };

        let upstream_request = builder
            .body(body)
            .map_err(|e| HandlerError::Server(format!("failed to build upstream request: {e}")))?;

        let response: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(upstream_request)
            .await
            .map_err(|e| HandlerError::Upstream(e.to_string()))?;

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| HandlerError::Upstream(format!("failed to read upstream body: {e}")))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::debug!(
            correlation_id,
            status = %status,
            upstream = %self.base_url,
            "Upstream responded"
        );
        Ok(ServiceResponse::with_status(status, body))
    }
}
