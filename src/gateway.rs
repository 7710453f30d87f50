//! Gateway assembly.
//!
//! Wires the shared store, clock, breaker, timeout manager, audit trail,
//! health tracker, auth collaborator and handlers into one `AppState`, and
//! exposes the traffic and admin routers built from it.

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::admin::setup_admin_router;
use crate::audit::{AuditDraft, AuditError, AuditEvent, AuditTrail, ChainHasher, CheckpointScheduler, Sha256Hasher};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::health::{HealthTracker, ServiceHealth};
use crate::http::server::{build_router, AppState};
use crate::resilience::{CircuitBreaker, TimeoutManager};
use crate::routing::Router as ServiceRouter;
use crate::security::{AuthProvider, StaticTokenAuth};
use crate::services::{HandlerRegistry, ServiceHandler, UpstreamHandler};
use crate::store::{KvStore, MemoryStore};

/// Builder for [`Gateway`]. Every collaborator has a config-driven default.
pub struct GatewayBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn KvStore>>,
    clock: Option<Arc<dyn Clock>>,
    hasher: Option<Arc<dyn ChainHasher>>,
    auth: Option<Arc<dyn AuthProvider>>,
    handlers: HandlerRegistry,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            hasher: None,
            auth: None,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn hasher(mut self, hasher: Arc<dyn ChainHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Register an in-process handler. Takes precedence over a configured upstream.
    pub fn handler(mut self, service: impl Into<String>, handler: Arc<dyn ServiceHandler>) -> Self {
        self.handlers.register(service, handler);
        self
    }

    pub fn build(self) -> Gateway {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let hasher = self
            .hasher
            .unwrap_or_else(|| Arc::new(Sha256Hasher) as Arc<dyn ChainHasher>);
        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(StaticTokenAuth::from_config(&config.auth)) as Arc<dyn AuthProvider>);

        let mut handlers = self.handlers;
        for service in &config.services {
            let Some(upstream) = &service.upstream else {
                continue;
            };
            if handlers.contains(&service.name) {
                continue;
            }
            match Url::parse(upstream) {
                Ok(url) => handlers.register(service.name.clone(), Arc::new(UpstreamHandler::new(url))),
                Err(e) => tracing::error!(service = %service.name, upstream = %upstream, error = %e, "Invalid upstream URL"),
            }
        }

        let router = ServiceRouter::from_config(&config.routes);
        let health = HealthTracker::new(config.health.clone());
        for name in router.service_names() {
            if !handlers.contains(&name) {
                tracing::warn!(service = %name, "Route targets a service with no handler");
            }
            health.register(&name);
        }

        let breaker = CircuitBreaker::new(store.clone(), clock.clone(), config.circuit_breaker.clone());
        let timeouts = TimeoutManager::from_config(&config.timeouts);
        let hash_algorithm = hasher.algorithm();
        let audit = AuditTrail::new(store, clock.clone(), hasher, config.audit.clone());

        tracing::info!(
            routes = router.routes().len(),
            handlers = handlers.len(),
            hash_algorithm,
            "Gateway assembled"
        );

        Gateway {
            state: AppState {
                router: Arc::new(router),
                handlers: Arc::new(handlers),
                auth,
                breaker: Arc::new(breaker),
                timeouts: Arc::new(timeouts),
                audit: Arc::new(audit),
                health: Arc::new(health),
                clock,
                config: Arc::new(config),
            },
        }
    }
}

/// The assembled gateway.
#[derive(Clone)]
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// Traffic router.
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Operator router, guarded by the admin api key.
    pub fn admin_router(&self) -> axum::Router {
        setup_admin_router(self.state.clone())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.state.breaker
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.state.audit
    }

    /// Rolling health of every routed service.
    pub fn service_health(&self) -> Vec<ServiceHealth> {
        self.state.health.service_health()
    }

    pub fn is_service_healthy(&self, service: &str) -> bool {
        self.state.health.is_service_healthy(service)
    }

    /// Append an audit event explicitly. Unlike automatic auditing, failures
    /// are returned to the caller.
    pub async fn log_audit_event(&self, draft: AuditDraft) -> Result<AuditEvent, AuditError> {
        self.state.audit.log_event(draft).await
    }

    /// Background job that checkpoints each completed day.
    pub fn checkpoint_scheduler(&self) -> CheckpointScheduler {
        CheckpointScheduler::new(
            self.state.audit.clone(),
            self.state.clock.clone(),
            Duration::from_secs(self.state.config.audit.checkpoint_interval_secs.max(1)),
        )
    }
}
