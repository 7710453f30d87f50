//! Append-only, hash-chained audit trail over the shared store.
//!
//! # Store Layout
//! ```text
//! audit:event:{sequence:020}   one immutable event per sequence number
//! audit:head                   {sequence, hash} of the newest known event (hint only)
//! audit:checkpoint:{date}      IntegrityCheckpoint for a completed UTC day
//! audit:checkpoints            sorted list of checkpointed dates
//! ```
//!
//! # Append Protocol
//! A writer reads the tail, seals its event at `tail + 1` and claims that
//! sequence key with a put-if-absent write. Exactly one writer wins each
//! sequence; losers re-read the tail and retry. The chain can therefore never
//! fork, whatever the number of replicas.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::event::{AuditDraft, AuditEvent};
use crate::audit::hasher::ChainHasher;
use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::store::{bounded, KvStore, StoreError};

const EVENT_PREFIX: &str = "audit:event:";
const HEAD_KEY: &str = "audit:head";
const CHECKPOINT_PREFIX: &str = "audit:checkpoint:";
const CHECKPOINT_INDEX_KEY: &str = "audit:checkpoints";
const MAX_INDEX_ATTEMPTS: usize = 8;

/// Errors raised by the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store error: {0}")]
    Store(#[from] StoreError),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit append abandoned after {attempts} contended attempts")]
    Contention { attempts: u32 },

    #[error("day {0} is not complete yet")]
    DayNotComplete(NaiveDate),

    #[error("chain is broken before {date}: {broken:?}")]
    ChainBroken { date: NaiveDate, broken: Vec<String> },
}

/// Anchor summarizing one completed day of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityCheckpoint {
    pub date: NaiveDate,
    /// Hash the day starts from (the last hash of the previous day).
    pub range_start_hash: String,
    /// Hash of the day's last event, or `range_start_hash` for an empty day.
    pub range_end_hash: String,
    pub event_count: u64,
    pub computed_at: DateTime<Utc>,
    pub first_sequence: Option<u64>,
    /// Sequence whose hash is `range_end_hash`; `None` when the chain was empty.
    pub last_sequence: Option<u64>,
}

/// Result of replaying part of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub broken_chains: Vec<String>,
    pub total_events: u64,
}

/// Inclusive time range. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct VerifyRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl VerifyRange {
    pub fn all() -> Self {
        Self::default()
    }

    fn contains(&self, ts: &DateTime<Utc>) -> bool {
        !self.before_start(ts) && !self.is_past(ts)
    }

    fn is_past(&self, ts: &DateTime<Utc>) -> bool {
        self.to.map_or(false, |t| *ts > t)
    }

    fn before_start(&self, ts: &DateTime<Utc>) -> bool {
        self.from.map_or(false, |f| *ts < f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChainHead {
    sequence: u64,
    hash: String,
}

/// Where a replay starts.
#[derive(Debug, Clone)]
struct ResumePoint {
    next_sequence: u64,
    previous_hash: String,
}

impl ResumePoint {
    fn genesis() -> Self {
        Self {
            next_sequence: 0,
            previous_hash: AuditEvent::GENESIS_HASH.to_string(),
        }
    }
}

/// One record seen during a replay.
#[derive(Debug)]
enum Replayed {
    Event { event: AuditEvent, intact: bool },
    Unreadable { sequence: u64 },
}

/// The audit trail.
pub struct AuditTrail {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn ChainHasher>,
    config: AuditConfig,
}

impl AuditTrail {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn ChainHasher>,
        config: AuditConfig,
    ) -> Self {
        Self {
            store,
            clock,
            hasher,
            config,
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }

    fn event_key(sequence: u64) -> String {
        format!("{EVENT_PREFIX}{sequence:020}")
    }

    fn checkpoint_key(date: NaiveDate) -> String {
        format!("{CHECKPOINT_PREFIX}{date}")
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, u64)>, AuditError> {
        match bounded(self.budget(), self.store.get(key)).await? {
            Some(v) => Ok(Some((serde_json::from_slice(&v.value)?, v.version))),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Vec<u8>,
    ) -> Result<Option<u64>, AuditError> {
        Ok(bounded(
            self.budget(),
            self.store.compare_and_set(key, expected, value, None),
        )
        .await?)
    }

    /// Raw record at `sequence`: `None` past the tail, `Err` bytes if undecodable.
    async fn record_at(&self, sequence: u64) -> Result<Option<Result<AuditEvent, ()>>, AuditError> {
        let key = Self::event_key(sequence);
        match bounded(self.budget(), self.store.get(&key)).await? {
            Some(v) => Ok(Some(serde_json::from_slice(&v.value).map_err(|e| {
                tracing::error!(sequence, error = %e, "Undecodable audit record");
            }))),
            None => Ok(None),
        }
    }

    /// Newest event's sequence and hash.
    async fn tail(&self) -> Result<Option<ChainHead>, AuditError> {
        let mut tail = self
            .read_json::<ChainHead>(HEAD_KEY)
            .await?
            .map(|(head, _)| head);
        let mut next = tail.as_ref().map_or(0, |h| h.sequence + 1);

        // The head hint may lag behind writers that crashed before moving it.
        while let Some(record) = self.record_at(next).await? {
            let hash = match record {
                Ok(event) => event.hash,
                Err(()) => String::new(),
            };
            tail = Some(ChainHead {
                sequence: next,
                hash,
            });
            next += 1;
        }
        Ok(tail)
    }

    async fn advance_head(&self, event: &AuditEvent) {
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let current = match self.read_json::<ChainHead>(HEAD_KEY).await {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read audit head");
                    return;
                }
            };
            if let Some((head, _)) = &current {
                if head.sequence >= event.sequence {
                    return;
                }
            }
            let head = ChainHead {
                sequence: event.sequence,
                hash: event.hash.clone(),
            };
            let bytes = match serde_json::to_vec(&head) {
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            match self.write(HEAD_KEY, current.map(|(_, v)| v), bytes).await {
                Ok(Some(_)) => return,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to advance audit head");
                    return;
                }
            }
        }
    }

    /// Append one event to the chain. Errors propagate to the caller.
    pub async fn log_event(&self, draft: AuditDraft) -> Result<AuditEvent, AuditError> {
        let attempts = self.config.max_append_attempts;
        for attempt in 1..=attempts {
            let (sequence, previous_hash) = match self.tail().await? {
                Some(head) => (head.sequence + 1, head.hash),
                None => (0, AuditEvent::GENESIS_HASH.to_string()),
            };

            let event = AuditEvent::seal(
                draft.clone(),
                Uuid::new_v4().to_string(),
                sequence,
                self.clock.now(),
                previous_hash,
                self.hasher.as_ref(),
            )?;
            let bytes = serde_json::to_vec(&event)?;

            if self
                .write(&Self::event_key(sequence), None, bytes)
                .await?
                .is_some()
            {
                self.advance_head(&event).await;
                tracing::debug!(
                    correlation_id = %event.correlation_id,
                    sequence,
                    action = %event.action,
                    "Audit event appended"
                );
                return Ok(event);
            }

            tracing::debug!(sequence, attempt, "Audit sequence taken by another writer, retrying");
        }
        Err(AuditError::Contention { attempts })
    }

    /// Stored checkpoint for `date`, if any.
    pub async fn checkpoint(&self, date: NaiveDate) -> Result<Option<IntegrityCheckpoint>, AuditError> {
        Ok(self
            .read_json(&Self::checkpoint_key(date))
            .await?
            .map(|(cp, _)| cp))
    }

    /// First day without a checkpoint: the day after the newest indexed one,
    /// else the day of the first event. `None` while the trail is empty.
    pub async fn first_unanchored_day(&self) -> Result<Option<NaiveDate>, AuditError> {
        if let Some((dates, _)) = self.checkpoint_index().await? {
            if let Some(newest) = dates.last() {
                return Ok(newest.succ_opt());
            }
        }
        Ok(match self.record_at(0).await? {
            Some(Ok(event)) => Some(event.date()),
            _ => None,
        })
    }

    async fn checkpoint_index(&self) -> Result<Option<(BTreeSet<NaiveDate>, u64)>, AuditError> {
        self.read_json(CHECKPOINT_INDEX_KEY).await
    }

    async fn add_to_index(&self, date: NaiveDate) -> Result<(), AuditError> {
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let (mut dates, version) = match self.checkpoint_index().await? {
                Some((dates, version)) => (dates, Some(version)),
                None => (BTreeSet::new(), None),
            };
            if !dates.insert(date) {
                return Ok(());
            }
            let bytes = serde_json::to_vec(&dates)?;
            if self.write(CHECKPOINT_INDEX_KEY, version, bytes).await?.is_some() {
                return Ok(());
            }
        }
        Err(AuditError::Contention {
            attempts: MAX_INDEX_ATTEMPTS as u32,
        })
    }

    /// Whether a checkpoint still matches the chain it anchors.
    async fn anchor_holds(&self, cp: &IntegrityCheckpoint) -> Result<bool, AuditError> {
        match cp.last_sequence {
            None => Ok(cp.range_end_hash == AuditEvent::GENESIS_HASH),
            Some(sequence) => Ok(match self.record_at(sequence).await? {
                Some(Ok(event)) => event.hash == cp.range_end_hash,
                _ => false,
            }),
        }
    }

    /// Resume point from the newest valid checkpoint strictly before `day`.
    async fn resume_before(&self, day: NaiveDate) -> Result<ResumePoint, AuditError> {
        let Some((dates, _)) = self.checkpoint_index().await? else {
            return Ok(ResumePoint::genesis());
        };

        for date in dates.range(..day).rev() {
            let Some(cp) = self.checkpoint(*date).await? else {
                continue;
            };
            if self.anchor_holds(&cp).await? {
                return Ok(ResumePoint {
                    next_sequence: cp.last_sequence.map_or(0, |s| s + 1),
                    previous_hash: cp.range_end_hash,
                });
            }
            tracing::warn!(date = %cp.date, "Checkpoint no longer matches the chain, falling back");
        }
        Ok(ResumePoint::genesis())
    }

    /// Walk the chain from `resume` until the tail or the first intact event
    /// after `range.to`.
    ///
    /// A record that fails verification cannot end the walk: its timestamp is
    /// as suspect as the rest of it.
    async fn replay(
        &self,
        resume: ResumePoint,
        range: &VerifyRange,
    ) -> Result<Vec<Replayed>, AuditError> {
        let mut out = Vec::new();
        let mut sequence = resume.next_sequence;
        let mut expected_prev = Some(resume.previous_hash);

        while let Some(record) = self.record_at(sequence).await? {
            match record {
                Ok(event) => {
                    let linked = expected_prev
                        .as_deref()
                        .map_or(true, |prev| prev == event.previous_hash);
                    let recomputed = event.compute_hash(self.hasher.as_ref())?;
                    let intact = linked && recomputed == event.hash;
                    if intact && range.is_past(&event.timestamp) {
                        break;
                    }
                    expected_prev = Some(event.hash.clone());
                    out.push(Replayed::Event { event, intact });
                }
                Err(()) => {
                    expected_prev = None;
                    out.push(Replayed::Unreadable { sequence });
                }
            }
            sequence += 1;
        }
        Ok(out)
    }

    /// Replay the chain over `range`, starting from the nearest valid
    /// checkpoint before the range start.
    ///
    /// Every record that fails verification between the resume point and the
    /// end of the range is reported, wherever its stored timestamp points.
    pub async fn verify_integrity(&self, range: VerifyRange) -> Result<IntegrityReport, AuditError> {
        let resume = match range.from {
            Some(from) => self.resume_before(from.date_naive()).await?,
            None => ResumePoint::genesis(),
        };

        let mut broken_chains = Vec::new();
        let mut total_events = 0;
        for replayed in self.replay(resume, &range).await? {
            match replayed {
                Replayed::Event {
                    event,
                    intact: true,
                } => {
                    if range.contains(&event.timestamp) {
                        total_events += 1;
                    }
                }
                // Placed by sequence, not by its own unverified timestamp.
                Replayed::Event {
                    event,
                    intact: false,
                } => {
                    total_events += 1;
                    broken_chains.push(event.id);
                }
                Replayed::Unreadable { sequence } => {
                    total_events += 1;
                    broken_chains.push(format!("sequence:{sequence}"));
                }
            }
        }

        let report = IntegrityReport {
            is_valid: broken_chains.is_empty(),
            broken_chains,
            total_events,
        };
        if report.is_valid {
            tracing::info!(
                total_events = report.total_events,
                algorithm = self.hasher.algorithm(),
                "Audit chain verified"
            );
        } else {
            tracing::error!(
                broken = ?report.broken_chains,
                algorithm = self.hasher.algorithm(),
                total_events = report.total_events,
                "Audit chain integrity violation"
            );
        }
        Ok(report)
    }

    /// Events within `range`, in chain order.
    pub async fn events(&self, range: VerifyRange) -> Result<Vec<AuditEvent>, AuditError> {
        let resume = match range.from {
            Some(from) => self.resume_before(from.date_naive()).await?,
            None => ResumePoint::genesis(),
        };
        Ok(self
            .replay(resume, &range)
            .await?
            .into_iter()
            .filter_map(|r| match r {
                Replayed::Event { event, .. } if range.contains(&event.timestamp) => Some(event),
                _ => None,
            })
            .collect())
    }

    /// Recompute and store the checkpoint for a completed UTC day.
    ///
    /// Refuses to anchor a day whose replayed chain is broken.
    pub async fn update_integrity_checkpoint(
        &self,
        date: NaiveDate,
    ) -> Result<IntegrityCheckpoint, AuditError> {
        if date >= self.clock.now().date_naive() {
            return Err(AuditError::DayNotComplete(date));
        }

        let resume = self.resume_before(date).await?;
        let mut last_sequence = resume.next_sequence.checked_sub(1);
        let mut running_hash = resume.previous_hash.clone();

        let day_end = date
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc() - chrono::Duration::nanoseconds(1));
        let range = VerifyRange {
            from: None,
            to: day_end,
        };

        let mut range_start_hash = None;
        let mut first_sequence = None;
        let mut event_count = 0;
        let mut broken = Vec::new();

        for replayed in self.replay(resume, &range).await? {
            let event = match replayed {
                Replayed::Event { event, intact } => {
                    if !intact {
                        broken.push(event.id.clone());
                    }
                    event
                }
                Replayed::Unreadable { sequence } => {
                    broken.push(format!("sequence:{sequence}"));
                    continue;
                }
            };

            if event.date() == date {
                if range_start_hash.is_none() {
                    range_start_hash = Some(running_hash.clone());
                    first_sequence = Some(event.sequence);
                }
                event_count += 1;
            }
            running_hash = event.hash;
            last_sequence = Some(event.sequence);
        }

        if !broken.is_empty() {
            tracing::error!(%date, ?broken, "Refusing to checkpoint a broken chain");
            return Err(AuditError::ChainBroken { date, broken });
        }

        let checkpoint = IntegrityCheckpoint {
            date,
            range_start_hash: range_start_hash.unwrap_or_else(|| running_hash.clone()),
            range_end_hash: running_hash,
            event_count,
            computed_at: self.clock.now(),
            first_sequence,
            last_sequence,
        };

        let key = Self::checkpoint_key(date);
        let bytes = serde_json::to_vec(&checkpoint)?;
        let mut stored = false;
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let version = bounded(self.budget(), self.store.get(&key))
                .await?
                .map(|v| v.version);
            if self.write(&key, version, bytes.clone()).await?.is_some() {
                stored = true;
                break;
            }
        }
        if !stored {
            return Err(AuditError::Contention {
                attempts: MAX_INDEX_ATTEMPTS as u32,
            });
        }
        self.add_to_index(date).await?;

        tracing::info!(
            %date,
            event_count = checkpoint.event_count,
            range_end_hash = %checkpoint.range_end_hash,
            "Integrity checkpoint stored"
        );
        Ok(checkpoint)
    }
}
