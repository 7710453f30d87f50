use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::CorrelationId;
use crate::http::response::GatewayError;
use crate::http::server::AppState;
use crate::security::bearer_token;

/// Require `Authorization: Bearer <admin api key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match bearer_token(presented) {
        Ok(token) if token == state.config.admin.api_key => next.run(request).await,
        _ => {
            let correlation_id = request
                .extensions()
                .get::<CorrelationId>()
                .cloned()
                .unwrap_or_default();
            tracing::warn!(%correlation_id, path = %request.uri().path(), "Rejected admin request");
            state
                .reject(
                    GatewayError::Unauthorized("Invalid admin api key".to_string()),
                    &correlation_id,
                )
                .into_response()
        }
    }
}
