use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Serialize;

use crate::audit::{AuditError, AuditEvent, IntegrityCheckpoint, IntegrityReport, VerifyRange};
use crate::health::ServiceHealth;
use crate::http::request::CorrelationId;
use crate::http::response::{ApiError, GatewayError};
use crate::http::server::AppState;
use crate::resilience::CircuitState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub services: usize,
    pub circuit_breaker_enabled: bool,
    pub audit_enabled: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: state.router.routes().len(),
        services: state.router.service_names().len(),
        circuit_breaker_enabled: state.config.circuit_breaker.enabled,
        audit_enabled: state.config.audit.enabled,
    })
}

pub async fn get_health(State(state): State<AppState>) -> Json<Vec<ServiceHealth>> {
    Json(state.health.service_health())
}

pub async fn get_service_health(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(service): Path<String>,
) -> Result<Json<ServiceHealth>, ApiError> {
    state
        .health
        .health_of(&service)
        .map(Json)
        .ok_or_else(|| state.reject(unknown_service(&service), &correlation_id))
}

/// Stored breaker record, or a fresh closed one if the service has none yet.
pub async fn get_circuit(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(service): Path<String>,
) -> Result<Json<CircuitState>, ApiError> {
    if !state.router.service_names().contains(&service) {
        return Err(state.reject(unknown_service(&service), &correlation_id));
    }

    match state.breaker.state(&service).await {
        Ok(Some(circuit)) => Ok(Json(circuit)),
        Ok(None) => Ok(Json(CircuitState::closed(&service, state.clock.now_ms()))),
        Err(e) => Err(state.reject(
            GatewayError::Internal(format!("Circuit state unavailable: {e}")),
            &correlation_id,
        )),
    }
}

pub async fn verify_audit(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    range: Result<Query<VerifyRange>, QueryRejection>,
) -> Result<Json<IntegrityReport>, ApiError> {
    let Query(range) = range
        .map_err(|e| state.reject(GatewayError::Validation(e.body_text()), &correlation_id))?;

    state
        .audit
        .verify_integrity(range)
        .await
        .map(Json)
        .map_err(|e| state.reject(audit_error(e), &correlation_id))
}

pub async fn list_audit_events(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    range: Result<Query<VerifyRange>, QueryRejection>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let Query(range) = range
        .map_err(|e| state.reject(GatewayError::Validation(e.body_text()), &correlation_id))?;

    state
        .audit
        .events(range)
        .await
        .map(Json)
        .map_err(|e| state.reject(audit_error(e), &correlation_id))
}

pub async fn create_checkpoint(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(date): Path<String>,
) -> Result<Json<IntegrityCheckpoint>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
        state.reject(
            GatewayError::Validation(format!("Invalid date '{date}', expected YYYY-MM-DD")),
            &correlation_id,
        )
    })?;

    let checkpoint = state
        .audit
        .update_integrity_checkpoint(date)
        .await
        .map_err(|e| state.reject(audit_error(e), &correlation_id))?;

    tracing::info!(
        %correlation_id,
        %date,
        events = checkpoint.event_count,
        "Integrity checkpoint written"
    );
    Ok(Json(checkpoint))
}

fn unknown_service(service: &str) -> GatewayError {
    GatewayError::Missing(format!("Unknown service {service}"))
}

fn audit_error(error: AuditError) -> GatewayError {
    match error {
        AuditError::DayNotComplete(_) => GatewayError::Validation(error.to_string()),
        AuditError::ChainBroken { .. } => GatewayError::IntegrityViolation(error.to_string()),
        other => GatewayError::Internal(other.to_string()),
    }
}
