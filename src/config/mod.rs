//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; route and timeout tables are never reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AuditConfig, AuthConfig, CircuitBreakerConfig, GatewayConfig, HealthConfig,
    ListenerConfig, ObservabilityConfig, RouteConfig, SecurityConfig, ServiceConfig,
    TimeoutConfig, TimeoutPolicyConfig, TokenConfig,
};
