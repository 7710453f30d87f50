//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (timeout policies reference known services)
//! - Validate value ranges (timeouts > 0, thresholds sane)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::matcher::PathPattern;

const METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("route '{route}': invalid path pattern: {reason}")]
    InvalidPattern { route: String, reason: String },

    #[error("route '{route}': unsupported method '{method}'")]
    InvalidMethod { route: String, method: String },

    #[error("route '{route}': service_name must not be empty")]
    MissingService { route: String },

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{service}': invalid upstream url '{url}'")]
    InvalidUpstream { service: String, url: String },

    #[error("timeout policy for '{0}' references no route")]
    UnknownTimeoutService(String),

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("health.unhealthy_ratio must be within (0, 1], got {0}")]
    InvalidRatio(String),

    #[error(
        "circuit_breaker.state_ttl_secs ({ttl_secs}s) must outlive the longest breaker period ({required_ms}ms)"
    )]
    StateTtlTooShort { ttl_secs: u64, required_ms: u64 },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for route in &config.routes {
        if let Err(reason) = PathPattern::parse(&route.path_pattern) {
            errors.push(ValidationError::InvalidPattern {
                route: route.name.clone(),
                reason,
            });
        }
        if !METHODS.contains(&route.method.to_ascii_uppercase().as_str()) {
            errors.push(ValidationError::InvalidMethod {
                route: route.name.clone(),
                method: route.method.clone(),
            });
        }
        if route.service_name.trim().is_empty() {
            errors.push(ValidationError::MissingService {
                route: route.name.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for service in &config.services {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if let Some(upstream) = &service.upstream {
            let valid = url::Url::parse(upstream)
                .map(|u| matches!(u.scheme(), "http") && u.host().is_some())
                .unwrap_or(false);
            if !valid {
                errors.push(ValidationError::InvalidUpstream {
                    service: service.name.clone(),
                    url: upstream.clone(),
                });
            }
        }
    }

    let routed: HashSet<&str> = config
        .routes
        .iter()
        .map(|r| r.service_name.as_str())
        .collect();
    for policy in &config.timeouts.services {
        if !routed.contains(policy.service_name.as_str()) {
            errors.push(ValidationError::UnknownTimeoutService(
                policy.service_name.clone(),
            ));
        }
        if policy.max_duration_ms == 0 {
            errors.push(ValidationError::Zero {
                field: format!("timeouts.services[{}].max_duration_ms", policy.service_name),
            });
        }
    }

    let cb = &config.circuit_breaker;
    let positive = [
        ("timeouts.default_ms", config.timeouts.default_ms),
        ("circuit_breaker.failure_threshold", cb.failure_threshold as u64),
        ("circuit_breaker.monitoring_period_ms", cb.monitoring_period_ms),
        ("circuit_breaker.recovery_timeout_ms", cb.recovery_timeout_ms),
        ("circuit_breaker.state_ttl_secs", cb.state_ttl_secs),
        ("circuit_breaker.store_timeout_ms", cb.store_timeout_ms),
        ("audit.store_timeout_ms", config.audit.store_timeout_ms),
        ("audit.max_append_attempts", config.audit.max_append_attempts as u64),
        ("audit.checkpoint_interval_secs", config.audit.checkpoint_interval_secs),
        ("health.window_size", config.health.window_size as u64),
        ("security.auth_timeout_ms", config.security.auth_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero {
                field: field.to_string(),
            });
        }
    }

    // An expired record reads as closed, so it must outlive open and windowed state.
    let required_ms = cb.recovery_timeout_ms.max(cb.monitoring_period_ms);
    if cb.state_ttl_secs > 0 && cb.state_ttl_secs.saturating_mul(1_000) <= required_ms {
        errors.push(ValidationError::StateTtlTooShort {
            ttl_secs: cb.state_ttl_secs,
            required_ms,
        });
    }

    let ratio = config.health.unhealthy_ratio;
    if !(ratio > 0.0 && ratio <= 1.0) {
        errors.push(ValidationError::InvalidRatio(ratio.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
