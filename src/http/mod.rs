//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (correlation ID reuse or mint)
//!     → server.rs (route, auth, breaker, timeout, handler, audit)
//!     → response.rs (error envelope on failure)
//!     → Send to client with x-correlation-id
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{CorrelationId, CorrelationIdExt, X_CORRELATION_ID};
pub use response::{ApiError, ErrorEnvelope, GatewayError};
pub use server::{build_router, AppState, HttpServer};
