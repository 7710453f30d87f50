//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: a probe is allowed through to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold AND observations >= minimum, within the monitoring period
//! Open → Half-Open: first can_execute after next_attempt_at (written during the read)
//! Half-Open → Closed: probe succeeds, counters reset
//! Half-Open → Open: probe fails, next_attempt_at = now + recovery timeout
//! ```
//!
//! # Design Decisions
//! - One record per dependency name, stored in the shared `KvStore` with a TTL
//! - Every update is a compare-and-set loop so replicas never lose a count
//! - Store failures fail open: no protection rather than no traffic
//! - Fail fast in Open state (the guarded call is never made)

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::store::{bounded, KvStore, StoreError, Versioned};

const KEY_PREFIX: &str = "circuit:";
const MAX_CAS_ATTEMPTS: usize = 8;

/// Breaker position for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::HalfOpen => "half_open",
            CircuitStatus::Open => "open",
        }
    }
}

/// Stored breaker record. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub name: String,
    pub state: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub window_started_at: i64,
    pub last_failure_at: Option<i64>,
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

impl CircuitState {
    /// A fresh closed record.
    pub fn closed(name: &str, now: i64) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            window_started_at: now,
            last_failure_at: None,
            next_attempt_at: None,
            last_error: None,
        }
    }

    fn roll_window(&mut self, config: &CircuitBreakerConfig, now: i64) {
        if now - self.window_started_at >= config.monitoring_period_ms as i64 {
            self.failure_count = 0;
            self.success_count = 0;
            self.window_started_at = now;
        }
    }

    fn open(&mut self, config: &CircuitBreakerConfig, now: i64) {
        self.state = CircuitStatus::Open;
        self.next_attempt_at = Some(now + config.recovery_timeout_ms as i64);
    }

    /// Apply a successful call.
    pub fn on_success(&mut self, config: &CircuitBreakerConfig, now: i64) {
        match self.state {
            CircuitStatus::HalfOpen => {
                let last_failure_at = self.last_failure_at;
                *self = Self::closed(&self.name, now);
                self.last_failure_at = last_failure_at;
            }
            CircuitStatus::Closed => {
                self.roll_window(config, now);
                self.success_count += 1;
            }
            // A call admitted before the circuit opened; the recovery timer decides.
            CircuitStatus::Open => {}
        }
    }

    /// Apply a failed call.
    pub fn on_failure(&mut self, config: &CircuitBreakerConfig, now: i64, error: String) {
        self.last_failure_at = Some(now);
        self.last_error = Some(error);

        match self.state {
            CircuitStatus::HalfOpen => {
                self.failure_count += 1;
                self.open(config, now);
            }
            CircuitStatus::Closed => {
                self.roll_window(config, now);
                self.failure_count += 1;
                let observations = self.failure_count + self.success_count;
                if self.failure_count >= config.failure_threshold
                    && observations >= config.minimum_requests
                {
                    self.open(config, now);
                }
            }
            CircuitStatus::Open => {
                self.failure_count += 1;
            }
        }
    }

    /// Whether a call may proceed at `now`. Moves an elapsed open circuit to
    /// half-open; the caller must persist the change.
    pub fn admit(&mut self, now: i64) -> bool {
        match self.state {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => true,
            CircuitStatus::Open => match self.next_attempt_at {
                Some(at) if now < at => false,
                _ => {
                    self.state = CircuitStatus::HalfOpen;
                    true
                }
            },
        }
    }
}

/// Per-dependency circuit breaker over a shared store.
pub struct CircuitBreaker {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn store_budget(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.state_ttl_secs)
    }

    fn key(service: &str) -> String {
        format!("{KEY_PREFIX}{service}")
    }

    async fn load(&self, service: &str) -> Result<Option<(CircuitState, u64)>, StoreError> {
        let key = Self::key(service);
        match bounded(self.store_budget(), self.store.get(&key)).await? {
            Some(Versioned { value, version }) => {
                let state: CircuitState = serde_json::from_slice(&value)
                    .map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))?;
                Ok(Some((state, version)))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        state: &CircuitState,
        expected: Option<u64>,
    ) -> Result<Option<u64>, StoreError> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        bounded(
            self.store_budget(),
            self.store
                .compare_and_set(&Self::key(&state.name), expected, bytes, Some(self.ttl())),
        )
        .await
    }

    /// Whether a call to `service` may proceed.
    pub async fn can_execute(&self, service: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (mut state, version) = match self.load(service).await {
                Ok(Some(found)) => found,
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!(service, error = %e, "Circuit state unavailable, allowing call");
                    metrics::record_store_error("circuit_breaker");
                    return true;
                }
            };

            let before = state.state;
            if !state.admit(self.clock.now_ms()) {
                return false;
            }
            if state.state == before {
                return true;
            }

            match self.save(&state, Some(version)).await {
                Ok(Some(_)) => {
                    tracing::info!(service, "Circuit half-open, allowing probe");
                    metrics::record_circuit_transition(service, state.state.as_str());
                    return true;
                }
                // Another replica moved the record; re-read it.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(service, error = %e, "Failed to persist half-open transition");
                    metrics::record_store_error("circuit_breaker");
                    return true;
                }
            }
        }
        true
    }

    /// Record a successful call to `service`.
    pub async fn record_success(&self, service: &str) {
        let config = self.config.clone();
        self.update(service, move |state, now| state.on_success(&config, now))
            .await;
    }

    /// Record a failed call to `service`.
    pub async fn record_failure(&self, service: &str, error: impl Display) {
        let config = self.config.clone();
        let message = error.to_string();
        self.update(service, move |state, now| {
            state.on_failure(&config, now, message.clone())
        })
        .await;
    }

    async fn update<F>(&self, service: &str, apply: F)
    where
        F: Fn(&mut CircuitState, i64),
    {
        if !self.config.enabled {
            return;
        }

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now_ms();
            let (mut state, version) = match self.load(service).await {
                Ok(Some((state, version))) => (state, Some(version)),
                Ok(None) => (CircuitState::closed(service, now), None),
                Err(e) => {
                    tracing::warn!(service, error = %e, "Circuit state unavailable, outcome not recorded");
                    metrics::record_store_error("circuit_breaker");
                    return;
                }
            };

            let before = state.state;
            apply(&mut state, now);

            match self.save(&state, version).await {
                Ok(Some(_)) => {
                    if state.state != before {
                        tracing::warn!(
                            service,
                            from = before.as_str(),
                            to = state.state.as_str(),
                            failures = state.failure_count,
                            "Circuit state changed"
                        );
                        metrics::record_circuit_transition(service, state.state.as_str());
                    }
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(service, error = %e, "Failed to persist circuit state");
                    metrics::record_store_error("circuit_breaker");
                    return;
                }
            }
        }

        tracing::warn!(service, "Circuit state update lost after repeated contention");
    }

    /// Current record for `service`, if one exists.
    pub async fn state(&self, service: &str) -> Result<Option<CircuitState>, StoreError> {
        Ok(self.load(service).await?.map(|(state, _)| state))
    }
}
