//! HTTP server setup and the gateway request pipeline.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Wire up middleware (correlation ID, tracing)
//! - Resolve routes, authenticate, and gate calls with the circuit breaker
//! - Run handlers under their time budget
//! - Record audit events, breaker outcomes, health and metrics
//!
//! # Pipeline
//! ```text
//! correlation ID → route → auth → JSON body → breaker → timeout(handler)
//!     → audit (authorized, < 400, mutating or auditable) → breaker/health → response
//! ```

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::audit::{Actor, AuditDiff, AuditDraft, AuditTrail};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::health::HealthTracker;
use crate::http::request::{correlation_middleware, CorrelationId, CorrelationIdExt, X_CORRELATION_ID};
use crate::http::response::{ApiError, GatewayError};
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, TimeoutError, TimeoutManager};
use crate::routing::{PathParams, Router as ServiceRouter, ServiceRoute};
use crate::security::{bearer_token, AuthError, AuthProvider, Principal};
use crate::services::{HandlerError, HandlerRegistry, ServiceRequest, ServiceResponse};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ServiceRouter>,
    pub handlers: Arc<HandlerRegistry>,
    pub auth: Arc<dyn AuthProvider>,
    pub breaker: Arc<CircuitBreaker>,
    pub timeouts: Arc<TimeoutManager>,
    pub audit: Arc<AuditTrail>,
    pub health: Arc<HealthTracker>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Bind an error to its request, stamped with the gateway clock.
    pub fn reject(&self, error: GatewayError, correlation_id: &CorrelationId) -> ApiError {
        error.with_correlation(correlation_id.as_str(), self.clock.now())
    }
}

/// An HTTP listener serving one router until shutdown.
pub struct HttpServer {
    router: Router,
    name: &'static str,
}

impl HttpServer {
    pub fn new(name: &'static str, router: Router) -> Self {
        Self { router, name }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(server = self.name, address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }
}

/// Build the traffic router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(gateway_handler))
        .route("/{*path}", any(gateway_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(correlation_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span)),
        )
}

/// Request span carrying the correlation ID. The trace layer must sit inside
/// the correlation middleware so the header is already set.
pub(crate) fn make_request_span(request: &Request<Body>) -> tracing::Span {
    let correlation_id = request
        .headers()
        .get(X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        correlation_id
    )
}

/// Main gateway handler.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let correlation_id = request
        .correlation_id()
        .cloned()
        .unwrap_or_else(|| CorrelationId::resolve(request.headers()));
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(matched) = state.router.match_request(&method, &path) else {
        tracing::debug!(%correlation_id, %method, %path, "No route matched");
        metrics::record_request("none", method.as_str(), 404, start);
        let not_found = GatewayError::NotFound {
            method: method.to_string(),
            path,
        };
        return state.reject(not_found, &correlation_id).into_response();
    };

    let route = matched.route;
    let response = match forward(&state, route, matched.params, request, &correlation_id).await {
        Ok(response) => response,
        Err(error) => {
            if error.status().is_server_error() {
                tracing::error!(
                    %correlation_id,
                    service = %route.service_name,
                    code = error.code(),
                    error = %error,
                    "Request failed"
                );
            } else {
                tracing::debug!(
                    %correlation_id,
                    service = %route.service_name,
                    code = error.code(),
                    error = %error,
                    "Request rejected"
                );
            }
            state.reject(error, &correlation_id).into_response()
        }
    };

    metrics::record_request(
        &route.service_name,
        method.as_str(),
        response.status().as_u16(),
        start,
    );
    response
}

async fn forward(
    state: &AppState,
    route: &ServiceRoute,
    params: PathParams,
    request: Request<Body>,
    correlation_id: &CorrelationId,
) -> Result<Response, GatewayError> {
    let service = route.service_name.as_str();
    let client_ip = client_ip(&request);
    let (parts, body) = request.into_parts();

    // 1. Authentication and authorization never touch the breaker.
    let principal = authenticate(state, route, &parts.headers).await?;

    // 2. Body
    let bytes = axum::body::to_bytes(body, state.config.security.max_body_size)
        .await
        .map_err(|e| GatewayError::Validation(format!("Request body rejected: {e}")))?;
    let request_body = parse_json_body(&bytes)?;

    let handler = state.handlers.get(service).ok_or_else(|| {
        GatewayError::Internal(format!("No handler registered for service {service}"))
    })?;

    // 3. Circuit breaker
    if !state.breaker.can_execute(service).await {
        metrics::record_circuit_rejected(service);
        tracing::warn!(%correlation_id, service, "Circuit open, failing fast");
        return Err(GatewayError::CircuitOpen(service.to_string()));
    }

    // 4. Handler under its time budget
    let service_request = ServiceRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        params: params.clone(),
        headers: parts.headers.clone(),
        body: request_body.clone(),
        principal: principal.clone(),
    };
    let handler_correlation_id = correlation_id.to_string();
    let outcome = state
        .timeouts
        .run(service, correlation_id.as_str(), async move {
            handler.handle(service_request, &handler_correlation_id).await
        })
        .await;

    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(error)) => {
            if error.is_dependency_failure() {
                record_failure(state, service, &error).await;
            } else {
                record_success(state, service).await;
            }
            return Err(match error {
                HandlerError::Client {
                    status,
                    code,
                    message,
                } => GatewayError::Client {
                    status,
                    code,
                    message,
                },
                HandlerError::Server(message) => GatewayError::Internal(message),
                HandlerError::Upstream(message) => GatewayError::Upstream(message),
            });
        }
        Err(error) => {
            record_failure(state, service, &error).await;
            return Err(match error {
                TimeoutError::Elapsed { max_duration_ms } => {
                    metrics::record_timeout(service);
                    GatewayError::Timeout(max_duration_ms)
                }
                TimeoutError::Aborted(_) => GatewayError::Internal(format!(
                    "Service {service} failed to produce a response"
                )),
            });
        }
    };

    // 5. Audit
    if let Some(principal) = &principal {
        if response.status.as_u16() < 400 && should_audit(state, route, &parts.method) {
            let draft = AuditDraft {
                correlation_id: correlation_id.to_string(),
                actor: Actor {
                    id: principal.id.clone(),
                    role: principal.role.clone(),
                    ip_address: client_ip,
                },
                action: route.name.clone(),
                entity_type: route.entity_type.clone(),
                entity_id: entity_id(&params, &response.body),
                diff: AuditDiff::for_method(&parts.method, &request_body, &response.body),
                metadata: json!({
                    "method": parts.method.as_str(),
                    "path": parts.uri.path(),
                    "service": service,
                    "statusCode": response.status.as_u16(),
                }),
            };
            if let Err(e) = state.audit.log_event(draft).await {
                metrics::record_audit_failure();
                tracing::error!(
                    %correlation_id,
                    service,
                    error = %e,
                    "Automatic audit logging failed, continuing"
                );
            }
        }
    }

    // 6. Breaker and health
    if response.status.is_server_error() {
        record_failure(state, service, format!("handler returned {}", response.status)).await;
    } else {
        record_success(state, service).await;
    }

    Ok(render(response))
}

async fn authenticate(
    state: &AppState,
    route: &ServiceRoute,
    headers: &HeaderMap,
) -> Result<Option<Principal>, GatewayError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if !route.protected {
        // Public routes still attribute identified callers.
        return match bearer_token(header) {
            Ok(token) => Ok(validate_token(state, token).await.ok()),
            Err(_) => Ok(None),
        };
    }

    let token = bearer_token(header)
        .map_err(|e| GatewayError::Unauthorized(format!("Authentication failed: {e}")))?;
    let principal = validate_token(state, token)
        .await
        .map_err(|e| GatewayError::Unauthorized(format!("Authentication failed: {e}")))?;

    if let Some(required) = &route.permission {
        if !state.auth.has_permission(&principal.permissions, required) {
            return Err(GatewayError::Forbidden(format!(
                "Permission {required} is required"
            )));
        }
    }
    Ok(Some(principal))
}

/// Token validation bounded by `security.auth_timeout_ms`.
async fn validate_token(state: &AppState, token: &str) -> Result<Principal, AuthError> {
    let budget_ms = state.config.security.auth_timeout_ms;
    match tokio::time::timeout(Duration::from_millis(budget_ms), state.auth.validate_token(token)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(budget_ms, "Token validation timed out");
            Err(AuthError::TimedOut(budget_ms))
        }
    }
}

fn parse_json_body(bytes: &Bytes) -> Result<Value, GatewayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::Validation(format!("Request body is not valid JSON: {e}")))
}

fn should_audit(state: &AppState, route: &ServiceRoute, method: &Method) -> bool {
    let mutating = matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    state.config.audit.enabled && (mutating || route.auditable)
}

/// `{id}` param, else the last captured param, else the `id` of the response.
fn entity_id(params: &PathParams, response_body: &Value) -> Option<String> {
    if let Some(id) = params.get("id").or_else(|| params.values().next_back()) {
        return Some(id.clone());
    }
    match response_body.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn client_ip(request: &Request<Body>) -> Option<String> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
    }
}

async fn record_success(state: &AppState, service: &str) {
    state.breaker.record_success(service).await;
    state.health.record_success(service);
}

async fn record_failure(state: &AppState, service: &str, error: impl std::fmt::Display) {
    state.breaker.record_failure(service, error).await;
    state.health.record_failure(service);
}

fn render(response: ServiceResponse) -> Response {
    if response.body.is_null() {
        response.status.into_response()
    } else {
        (response.status, Json(response.body)).into_response()
    }
}
