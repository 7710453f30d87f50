//! Shared state store subsystem.
//!
//! # Data Flow
//! ```text
//! Circuit breaker / audit trail
//!     → bounded() (fixed per-call budget)
//!     → KvStore::get / KvStore::compare_and_set
//!     → backing store (memory.rs in-process, or an external KV service)
//! ```
//!
//! # Design Decisions
//! - The only write primitive is compare-and-set, atomic per key
//! - Versions are opaque and monotonic; `None` means "key must be absent"
//! - TTL is attached per write; expired keys read as absent
//! - Every call is wrapped in a short timeout so a slow store never stalls a request

pub mod memory;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;

/// A stored value together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

/// Errors raised by a shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

/// Key-value store shared by every gateway replica.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Write `value` only if the key is currently at `expected` version
    /// (`None` = the key must not exist). Returns the new version on success,
    /// `None` if the condition did not hold.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<Option<u64>, StoreError>;
}

/// Run a store operation with a fixed time budget.
pub async fn bounded<T, F>(budget: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(budget, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(budget)),
    }
}
