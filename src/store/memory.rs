//! In-process `KvStore` backed by a concurrent map.
//!
//! Used for single-replica deployments and tests. Per-key atomicity comes
//! from DashMap's shard lock held across the version check and the write.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{KvStore, StoreError, Versioned};

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// Thread-safe in-memory store. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Slot>>,
    next_version: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|r| r.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let now = Instant::now();
        let expired = match self.inner.get(key) {
            Some(slot) if slot.is_live(now) => {
                return Ok(Some(Versioned {
                    value: slot.value.clone(),
                    version: slot.version,
                }));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.inner.remove_if(key, |_, slot| !slot.is_live(now));
        }
        Ok(None)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let expires_at = ttl.map(|t| now + t);

        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let current_version = current.is_live(now).then_some(current.version);
                if current_version != expected {
                    return Ok(None);
                }
                let version = self.bump();
                occupied.insert(Slot {
                    value,
                    version,
                    expires_at,
                });
                Ok(Some(version))
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(None);
                }
                let version = self.bump();
                vacant.insert(Slot {
                    value,
                    version,
                    expires_at,
                });
                Ok(Some(version))
            }
        }
    }
}
