//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request on a protected route:
//!     → auth.rs bearer_token (extract)
//!     → AuthProvider::validate_token (external collaborator, bounded by auth_timeout_ms)
//!     → AuthProvider::has_permission (route's required permission)
//!     → Pass to circuit breaker
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing or invalid token never reaches a handler
//! - Identity service outages surface as UNAUTHORIZED, not as breaker failures

pub mod auth;

pub use auth::{bearer_token, AuthError, AuthProvider, Principal, StaticTokenAuth};
