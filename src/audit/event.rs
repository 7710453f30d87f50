//! Audit event types and canonical hashing.
//!
//! An `AuditEvent` commits to its predecessor through `previous_hash`.
//! `hash` covers every other field in canonical form (JSON with sorted keys,
//! compact separators), so editing any stored field is detectable.

use axum::http::Method;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::hasher::ChainHasher;

/// Who performed the audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: String,
    pub ip_address: Option<String>,
}

/// State before and after a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDiff {
    pub before: Value,
    pub after: Value,
}

impl AuditDiff {
    /// Diff capture by verb. Reads and unknown verbs record no diff.
    pub fn for_method(method: &Method, request_body: &Value, response_body: &Value) -> Option<Self> {
        match *method {
            Method::POST => Some(Self {
                before: Value::Null,
                after: response_body.clone(),
            }),
            Method::PUT | Method::PATCH => Some(Self {
                before: request_body.clone(),
                after: response_body.clone(),
            }),
            Method::DELETE => Some(Self {
                before: response_body.clone(),
                after: Value::Null,
            }),
            _ => None,
        }
    }
}

/// An event as submitted, before it is placed on the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub correlation_id: String,
    pub actor: Actor,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub diff: Option<AuditDiff>,
    pub metadata: Value,
}

/// An appended, hash-linked audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub sequence: u64,
    pub correlation_id: String,
    pub actor: Actor,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub diff: Option<AuditDiff>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

/// Fields covered by the hash, in borrowed form.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    id: &'a str,
    sequence: u64,
    correlation_id: &'a str,
    actor: &'a Actor,
    action: &'a str,
    entity_type: &'a str,
    entity_id: Option<&'a str>,
    diff: Option<&'a AuditDiff>,
    metadata: &'a Value,
    timestamp: &'a DateTime<Utc>,
}

impl AuditEvent {
    /// `previous_hash` of the first event in the chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    /// Place a draft on the chain after `previous_hash`.
    pub fn seal(
        draft: AuditDraft,
        id: String,
        sequence: u64,
        timestamp: DateTime<Utc>,
        previous_hash: String,
        hasher: &dyn ChainHasher,
    ) -> Result<Self, serde_json::Error> {
        let mut event = Self {
            id,
            sequence,
            correlation_id: draft.correlation_id,
            actor: draft.actor,
            action: draft.action,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            diff: draft.diff,
            metadata: draft.metadata,
            timestamp,
            previous_hash,
            hash: String::new(),
        };
        event.hash = event.compute_hash(hasher)?;
        Ok(event)
    }

    /// Canonical bytes of every field except the two hashes.
    pub fn canonical_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        let fields = HashedFields {
            id: &self.id,
            sequence: self.sequence,
            correlation_id: &self.correlation_id,
            actor: &self.actor,
            action: &self.action,
            entity_type: &self.entity_type,
            entity_id: self.entity_id.as_deref(),
            diff: self.diff.as_ref(),
            metadata: &self.metadata,
            timestamp: &self.timestamp,
        };
        let value = canonicalize(serde_json::to_value(&fields)?);
        serde_json::to_vec(&value)
    }

    /// Recompute this event's hash from its fields and `previous_hash`.
    pub fn compute_hash(&self, hasher: &dyn ChainHasher) -> Result<String, serde_json::Error> {
        Ok(hasher.chain_hash(&self.previous_hash, &self.canonical_payload()?))
    }

    /// UTC calendar day the event belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Rebuild objects with lexicographically ordered keys, recursively.
/// Independent of whether serde_json preserves insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
