//! Resilience and audit gateway for a multi-tenant transportation backend.

pub mod admin;
pub mod audit;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod services;
pub mod store;

pub use config::schema::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder};
pub use http::{GatewayError, HttpServer};
pub use lifecycle::Shutdown;
