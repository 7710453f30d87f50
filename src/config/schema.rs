//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route table mapping requests to services.
    pub routes: Vec<RouteConfig>,

    /// Downstream service definitions.
    pub services: Vec<ServiceConfig>,

    /// Per-service timeout policies.
    pub timeouts: TimeoutConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Audit trail settings.
    pub audit: AuditConfig,

    /// Rolling service health settings.
    pub health: HealthConfig,

    /// Static token table for the default auth collaborator.
    pub auth: AuthConfig,

    /// Operator endpoints.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request limits.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One entry of the static route table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier, used as the audit action name.
    pub name: String,

    /// Path pattern, e.g. `/rides/{id}/cancel` or `/static/{*rest}`.
    pub path_pattern: String,

    /// HTTP method, matched exactly.
    pub method: String,

    /// Downstream service that handles this route.
    pub service_name: String,

    /// Tie-break between equally specific patterns (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Require a valid bearer token.
    #[serde(default)]
    pub protected: bool,

    /// Permission the principal must hold.
    #[serde(default)]
    pub permission: Option<String>,

    /// Audit this route even when the method is a read.
    #[serde(default)]
    pub auditable: bool,

    /// Entity type recorded in audit events (defaults to the service name).
    #[serde(default)]
    pub entity_type: Option<String>,
}

/// Downstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service name referenced by routes.
    pub name: String,

    /// Base URL to forward to. Services without one must be registered in code.
    #[serde(default)]
    pub upstream: Option<String>,
}

/// Timeout policy table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Duration applied to services without an explicit policy.
    pub default_ms: u64,

    /// Per-service overrides.
    pub services: Vec<TimeoutPolicyConfig>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            services: Vec::new(),
        }
    }
}

/// A single per-service timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutPolicyConfig {
    pub service_name: String,
    pub max_duration_ms: u64,
}

/// Circuit breaker thresholds, shared by every dependency.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. When disabled every call is allowed.
    pub enabled: bool,

    /// Failures within the monitoring period that open the circuit.
    pub failure_threshold: u32,

    /// Minimum observations in the period before the circuit may open.
    pub minimum_requests: u32,

    /// Length of the counting window in milliseconds.
    pub monitoring_period_ms: u64,

    /// Time an open circuit waits before allowing a probe, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// TTL of the stored state record in seconds.
    pub state_ttl_secs: u64,

    /// Budget for a single store read or write in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            minimum_requests: 10,
            monitoring_period_ms: 60_000,
            recovery_timeout_ms: 30_000,
            state_ttl_secs: 3_600,
            store_timeout_ms: 100,
        }
    }
}

/// Audit trail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Record audit events from the gateway.
    pub enabled: bool,

    /// Budget for a single store read or write in milliseconds.
    pub store_timeout_ms: u64,

    /// Attempts before an append gives up under contention.
    pub max_append_attempts: u32,

    /// Run the daily checkpoint job.
    pub checkpoint_enabled: bool,

    /// How often the checkpoint job wakes up, in seconds.
    pub checkpoint_interval_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_timeout_ms: 250,
            max_append_attempts: 16,
            checkpoint_enabled: true,
            checkpoint_interval_secs: 3_600,
        }
    }
}

/// Rolling health window.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of most recent outcomes kept per service.
    pub window_size: usize,

    /// Failure ratio at or above which a service is unhealthy.
    pub unhealthy_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            unhealthy_ratio: 0.5,
        }
    }
}

/// Tokens accepted by the static auth collaborator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenConfig>,
}

/// A bearer token and the principal it resolves to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub token: String,
    pub actor_id: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when RUST_LOG is not set.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "transit_gateway=debug,tower_http=debug".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
    /// Budget for one token validation by the identity collaborator.
    pub auth_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            auth_timeout_ms: 2_000,
        }
    }
}
