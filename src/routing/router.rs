//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for a method + path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Routes pre-sorted: specificity, then priority, then declaration order
//! - O(n) scan over the sorted list, first match wins
//! - Explicit NoMatch rather than silent default

use axum::http::Method;
use std::str::FromStr;

use crate::config::RouteConfig;
use crate::routing::matcher::{PathParams, PathPattern, Specificity};

/// A compiled entry of the static route table.
#[derive(Debug, Clone)]
pub struct ServiceRoute {
    pub name: String,
    pub pattern: PathPattern,
    pub method: Method,
    pub service_name: String,
    pub priority: u32,
    pub protected: bool,
    pub permission: Option<String>,
    pub auditable: bool,
    pub entity_type: String,
}

impl ServiceRoute {
    /// Compile a route from config.
    pub fn from_config(config: &RouteConfig) -> Result<Self, String> {
        let pattern = PathPattern::parse(&config.path_pattern)?;
        let method = Method::from_str(&config.method.to_ascii_uppercase())
            .map_err(|e| format!("route '{}': {e}", config.name))?;

        Ok(Self {
            name: config.name.clone(),
            pattern,
            method,
            service_name: config.service_name.clone(),
            priority: config.priority,
            protected: config.protected,
            permission: config.permission.clone(),
            auditable: config.auditable,
            entity_type: config
                .entity_type
                .clone()
                .unwrap_or_else(|| config.service_name.clone()),
        })
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a ServiceRoute,
    pub params: PathParams,
}

/// Ordered, immutable route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<ServiceRoute>,
}

impl Router {
    /// Build from already compiled routes, given in declaration order.
    pub fn new(routes: Vec<ServiceRoute>) -> Self {
        let mut indexed: Vec<(usize, ServiceRoute)> = routes.into_iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            let rank = |r: &ServiceRoute| -> (Specificity, u32) { (r.pattern.specificity(), r.priority) };
            rank(b).cmp(&rank(a)).then(ia.cmp(ib))
        });

        Self {
            routes: indexed.into_iter().map(|(_, r)| r).collect(),
        }
    }

    /// Compile the route table from config. Invalid entries are skipped and
    /// logged; `validate_config` rejects them before startup.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let routes = configs
            .iter()
            .filter_map(|c| match ServiceRoute::from_config(c) {
                Ok(route) => Some(route),
                Err(reason) => {
                    tracing::error!(route = %c.name, %reason, "Skipping invalid route");
                    None
                }
            })
            .collect();
        Self::new(routes)
    }

    /// Find the route for a request.
    pub fn match_request(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|r| &r.method == method)
            .find_map(|route| {
                route
                    .pattern
                    .match_path(path)
                    .map(|params| RouteMatch { route, params })
            })
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    /// Distinct service names, in evaluation order.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for route in &self.routes {
            if !names.contains(&route.service_name) {
                names.push(route.service_name.clone());
            }
        }
        names
    }
}
