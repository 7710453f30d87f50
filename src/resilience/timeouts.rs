//! Timeout enforcement.
//!
//! # Responsibilities
//! - Look up the time budget for a service class
//! - Run a handler under that budget
//! - Abandon (not kill) handlers that overrun
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The handler runs as its own task: on overrun the caller gets an error
//!   immediately and the task's eventual result is dropped
//! - Dropping the returned future (client went away) cancels the timer
//! - Timeout errors are distinct from other errors and map to 504

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::TimeoutConfig;

/// Static time budget for one service class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub service_name: String,
    pub max_duration: Duration,
}

impl TimeoutPolicy {
    pub fn max_duration_ms(&self) -> u64 {
        self.max_duration.as_millis() as u64
    }
}

/// Why a guarded invocation did not produce a value.
#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("Request timed out after {max_duration_ms}ms")]
    Elapsed { max_duration_ms: u64 },

    #[error("handler aborted: {0}")]
    Aborted(String),
}

/// Per-service timeout table. Immutable after construction.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    default: Duration,
    policies: HashMap<String, Duration>,
}

impl TimeoutManager {
    pub fn new(default: Duration, policies: HashMap<String, Duration>) -> Self {
        Self { default, policies }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        let policies = config
            .services
            .iter()
            .map(|p| (p.service_name.clone(), Duration::from_millis(p.max_duration_ms)))
            .collect();
        Self::new(Duration::from_millis(config.default_ms), policies)
    }

    /// Policy for `service`, falling back to the default duration.
    pub fn policy_for(&self, service: &str) -> TimeoutPolicy {
        TimeoutPolicy {
            service_name: service.to_string(),
            max_duration: self.policies.get(service).copied().unwrap_or(self.default),
        }
    }

    /// Run `handler` under the budget for `service`.
    ///
    /// `correlation_id` is only used for logging; the caller attaches it to
    /// the error response.
    pub async fn run<F, T>(
        &self,
        service: &str,
        correlation_id: &str,
        handler: F,
    ) -> Result<T, TimeoutError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let policy = self.policy_for(service);
        let mut task = tokio::spawn(handler);

        match tokio::time::timeout(policy.max_duration, &mut task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(join_error)) => {
                tracing::error!(
                    correlation_id,
                    service,
                    error = %join_error,
                    "Handler task failed"
                );
                Err(TimeoutError::Aborted(join_error.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    correlation_id,
                    service,
                    max_duration_ms = policy.max_duration_ms(),
                    "Handler exceeded its time budget, abandoning"
                );
                // Dropping the JoinHandle detaches the task; its output is discarded.
                drop(task);
                Err(TimeoutError::Elapsed {
                    max_duration_ms: policy.max_duration_ms(),
                })
            }
        }
    }
}
