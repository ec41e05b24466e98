//! C6 — Audit Log: fire-and-forget, append-only recording of domain events.
//!
//! Grounded on the teacher's rate-limited-logging idiom for best-effort side
//! effects (never let an observability write fail the operation it is
//! observing), generalized to a structured in-memory log. `spec.md` §4.6:
//! writes are best-effort and never propagate errors to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mockable::Clock;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    User,
    System,
    Worker,
}

/// One immutable audit row. `spec.md` §3 "Audit Entry".
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub actor_kind: ActorKind,
    pub session_id: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Parameters accepted by `AuditLog::record`.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub actor_kind: ActorKind,
    pub session_id: Option<String>,
    pub payload: Value,
}

impl RecordParams {
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor_kind: ActorKind,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            actor_id: None,
            actor_kind,
            session_id: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Append-only log of audit entries, indexed by insertion order within
/// `(entity_type, entity_id)`.
pub struct AuditLog {
    entries: DashMap<(String, String), Vec<AuditEntry>>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    /// Fire-and-forget: never returns an error to the caller. Storage
    /// failures are logged at error level and the row is dropped.
    pub fn record(&self, params: RecordParams) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            event_type: params.event_type,
            entity_type: params.entity_type.clone(),
            entity_id: params.entity_id.clone(),
            actor_id: params.actor_id,
            actor_kind: params.actor_kind,
            session_id: params.session_id,
            payload: params.payload,
            created_at: self.clock.utc(),
        };

        let key = (params.entity_type, params.entity_id);
        self.entries.entry(key).or_default().push(entry);
    }

    #[must_use]
    pub fn list_by_entity(&self, entity_type: &str, entity_id: &str, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .get(&(entity_type.to_owned(), entity_id.to_owned()))
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}
