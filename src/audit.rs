//! Structured audit trail for material actions.
//!
//! One JSON line per event: order submit/cancel/expire, settled trades,
//! settlement failures, pair halts. Sink: stdout or pluggable (tests use the
//! in-memory sink).

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Action recorded on an audit line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    OrderSubmit,
    OrderCancel,
    OrderExpire,
    TradeSettled,
    SettlementFailure,
    PairHalted,
}

/// Single audit record.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Who performed the action: "user-<id>" or "system".
    pub actor: String,
    pub action: AuditAction,
    pub pair: String,
    /// Action-specific identifiers (order id, trade id, error detail).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<serde_json::Value>,
    /// "accepted", "rejected:<kind>", "settled", "halted".
    pub outcome: String,
}

impl AuditEvent {
    pub fn now(
        actor: impl Into<String>,
        action: AuditAction,
        pair: impl Into<String>,
        resource: Option<serde_json::Value>,
        outcome: impl Into<String>,
    ) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        AuditEvent {
            timestamp_ms,
            actor: actor.into(),
            action,
            pair: pair.into(),
            resource,
            outcome: outcome.into(),
        }
    }
}

/// Sink for audit events. Implementations write to stdout, a file, or memory.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Writes one JSON line per event to stdout.
pub struct StdoutAuditSink;

impl AuditSink for StdoutAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    }
}

/// Stores events for tests. Clone shares the same backing buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock").clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        self.events.lock().expect("lock").push(event.clone());
    }
}
