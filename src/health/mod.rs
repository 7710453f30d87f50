//! Service health subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway observes a handler outcome
//!     → state.rs (rolling window per service)
//!     → admin endpoints / metrics gauge
//! ```
//!
//! # Design Decisions
//! - 4xx are NOT failures (client error, not the service)
//! - Timeouts and 5xx are failures
//! - Health is reporting only; gating is the circuit breaker's job

pub mod state;

pub use state::{HealthTracker, ServiceHealth};
