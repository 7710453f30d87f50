//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate path pattern, capture params)
//!     → Return: matched ServiceRoute or NoMatch
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Compile patterns
//!     → Sort by specificity, priority, declaration order
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::{PathParams, PathPattern};
pub use router::{RouteMatch, Router, ServiceRoute};
