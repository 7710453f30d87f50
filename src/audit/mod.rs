//! Audit trail subsystem.
//!
//! # Data Flow
//! ```text
//! Authorized mutating request completes (status < 400)
//!     → event.rs (draft + diff by verb)
//!     → trail.rs (read tail, seal with hasher.rs, conditional append)
//!
//! Daily:
//!     scheduler.rs → trail.rs update_integrity_checkpoint(yesterday)
//!
//! On demand (admin):
//!     trail.rs verify_integrity(range) → replay from nearest valid checkpoint
//! ```
//!
//! # Design Decisions
//! - One global chain; events are never updated or deleted
//! - Explicit `log_event` calls propagate failures; the gateway's automatic
//!   recording logs and continues
//! - Reads are only chained when their route is flagged auditable

pub mod event;
pub mod hasher;
pub mod scheduler;
pub mod trail;

pub use event::{Actor, AuditDiff, AuditDraft, AuditEvent};
pub use hasher::{ChainHasher, Sha256Hasher};
pub use scheduler::CheckpointScheduler;
pub use trail::{AuditError, AuditTrail, IntegrityCheckpoint, IntegrityReport, VerifyRange};
