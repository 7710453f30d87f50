//! Rolling per-service health.
//!
//! # Responsibilities
//! - Keep the last `window_size` outcomes per service
//! - Report failure/success counts and a healthy flag
//!
//! # Design Decisions
//! - Process-local: this is an operator view, the breaker is the shared gate
//! - A service with no observations is healthy
//! - Healthy while failure ratio < `unhealthy_ratio`

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;

use crate::config::HealthConfig;
use crate::observability::metrics;

/// Health summary for one service, as exposed to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_name: String,
    pub healthy: bool,
    pub failure_count: u64,
    pub success_count: u64,
}

#[derive(Debug, Default)]
struct Window {
    outcomes: VecDeque<bool>,
    failures: u64,
}

impl Window {
    fn push(&mut self, success: bool, capacity: usize) {
        if self.outcomes.len() == capacity {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    fn successes(&self) -> u64 {
        self.outcomes.len() as u64 - self.failures
    }
}

/// Thread-safe rolling health tracker.
#[derive(Debug)]
pub struct HealthTracker {
    windows: DashMap<String, Window>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Make `service` visible in reports before any traffic.
    pub fn register(&self, service: &str) {
        self.windows.entry(service.to_string()).or_default();
    }

    pub fn record_success(&self, service: &str) {
        self.record(service, true);
    }

    pub fn record_failure(&self, service: &str) {
        self.record(service, false);
    }

    fn record(&self, service: &str, success: bool) {
        let healthy = {
            let mut window = self.windows.entry(service.to_string()).or_default();
            window.push(success, self.config.window_size.max(1));
            self.is_healthy_window(&window)
        };
        metrics::record_service_health(service, healthy);
    }

    fn is_healthy_window(&self, window: &Window) -> bool {
        let total = window.outcomes.len();
        if total == 0 {
            return true;
        }
        (window.failures as f64 / total as f64) < self.config.unhealthy_ratio
    }

    pub fn is_service_healthy(&self, service: &str) -> bool {
        self.windows
            .get(service)
            .map(|w| self.is_healthy_window(&w))
            .unwrap_or(true)
    }

    pub fn health_of(&self, service: &str) -> Option<ServiceHealth> {
        self.windows.get(service).map(|w| ServiceHealth {
            service_name: service.to_string(),
            healthy: self.is_healthy_window(&w),
            failure_count: w.failures,
            success_count: w.successes(),
        })
    }

    /// Every known service, sorted by name.
    pub fn service_health(&self) -> Vec<ServiceHealth> {
        let mut names: Vec<String> = self.windows.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names.iter().filter_map(|n| self.health_of(n)).collect()
    }
}
