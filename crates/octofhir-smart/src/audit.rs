//! Audit event emission.
//!
//! Authorization and resource operations report what happened through an
//! [`AuditSink`]. The default sink writes each event as a structured
//! `tracing` event on the `audit` target; persisting events is up to
//! whoever subscribes to that target.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

/// What was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Resource read.
    Read,
    /// Resource create.
    Create,
    /// Resource update.
    Update,
    /// Resource delete.
    Delete,
    /// Resource search.
    Search,
    /// Authorization redirect issued or callback processed.
    Authorize,
    /// Token obtained.
    Token,
}

impl AuditAction {
    /// Returns the action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Search => "search",
            Self::Authorize => "authorize",
            Self::Token => "token",
        }
    }
}

/// How it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation succeeded.
    Success,
    /// The operation failed.
    Failure,
}

impl AuditOutcome {
    /// Returns the outcome name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One auditable occurrence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Who acted (client id or session id).
    pub principal_id: String,
    /// What was done.
    pub action: AuditAction,
    /// Resource type, when a resource was involved.
    pub resource_type: Option<String>,
    /// Resource id, when one was involved.
    pub resource_id: Option<String>,
    /// How it went.
    pub outcome: AuditOutcome,
    /// Free-form details.
    pub details: Option<Value>,
    /// When it happened.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

impl AuditEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(principal_id: impl Into<String>, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            principal_id: principal_id.into(),
            action,
            resource_type: None,
            resource_id: None,
            outcome,
            details: None,
            recorded_at: OffsetDateTime::now_utc(),
        }
    }

    /// Sets the resource type and optional id.
    #[must_use]
    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_id: Option<&str>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = resource_id.map(str::to_string);
        self
    }

    /// Attaches details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Receives audit events. Implementations must not block.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: AuditEvent);
}

/// Emits audit events through `tracing` on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = event
            .details
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        tracing::info!(
            target: "audit",
            principal_id = %event.principal_id,
            action = event.action.as_str(),
            resource_type = event.resource_type.as_deref().unwrap_or(""),
            resource_id = event.resource_id.as_deref().unwrap_or(""),
            outcome = event.outcome.as_str(),
            details = %details,
            "audit event"
        );
    }
}

/// Keeps events in memory. Useful in tests and for inspection endpoints.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new("client-1", AuditAction::Read, AuditOutcome::Success)
            .with_resource("Patient", Some("123"))
            .with_details(json!({"status": 200}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["principalId"], "client-1");
        assert_eq!(value["action"], "read");
        assert_eq!(value["resourceType"], "Patient");
        assert_eq!(value["resourceId"], "123");
        assert_eq!(value["outcome"], "success");
        assert_eq!(value["details"]["status"], 200);
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new("a", AuditAction::Token, AuditOutcome::Failure));
        TracingAuditSink.record(AuditEvent::new("a", AuditAction::Token, AuditOutcome::Success));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, AuditOutcome::Failure);
    }
}
