//! Business service subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway (after auth, breaker and timeout checks)
//!     → handler.rs HandlerRegistry lookup by service name
//!     → ServiceHandler::handle(request, correlation_id)
//!         in-process handler, or upstream.rs forwarding over HTTP
//! ```

pub mod handler;
pub mod upstream;

pub use handler::{
    handler_fn, HandlerError, HandlerRegistry, ServiceHandler, ServiceRequest, ServiceResponse,
};
pub use upstream::UpstreamHandler;
