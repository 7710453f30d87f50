//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a service:
//!     → circuit_breaker.rs (fail fast if the dependency's circuit is open)
//!     → timeouts.rs (run the handler under its service budget)
//!     → circuit_breaker.rs (record success or failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every handler call has a deadline
//! - No automatic retries; retry policy belongs to the caller
//! - Circuit breaker prevents cascading failures
//! - Breaker state lives in the shared store, not in process memory

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
pub use timeouts::{TimeoutError, TimeoutManager, TimeoutPolicy};
