//! Operator surface.
//!
//! # Endpoints
//! ```text
//! GET  /admin/status
//! GET  /admin/health
//! GET  /admin/health/{service}
//! GET  /admin/circuits/{service}
//! GET  /admin/audit/verify?from&to
//! GET  /admin/audit/events?from&to
//! POST /admin/audit/checkpoints/{date}
//! ```
//!
//! All endpoints require the admin api key as a bearer token.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::request::correlation_middleware;
use crate::http::server::{make_request_span, AppState};

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/health/{service}", get(get_service_health))
        .route("/admin/circuits/{service}", get(get_circuit))
        .route("/admin/audit/verify", get(verify_audit))
        .route("/admin/audit/events", get(list_audit_events))
        .route("/admin/audit/checkpoints/{date}", post(create_checkpoint))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(correlation_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span)),
        )
}
