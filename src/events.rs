//! Domain events and the notification port.
//!
//! Core operations never deliver notifications themselves: each mutation
//! returns the events it produced inside a [`Mutation`], and an outer
//! layer (the daemon, or an embedding application) hands them to a
//! [`NotificationPort`] via [`dispatch`]. Delivery is best-effort; a port
//! failure is logged and swallowed so a committed mutation is never
//! reported as failed after the fact.

use crate::types::Role;
use serde::{Deserialize, Serialize};

/// Domain event kinds emitted on successful mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobUpdated,
    JobDeleted,
    JobAcknowledged,
    TaskAdded,
    TaskCompleted,
    TaskRejected,
    ProgressSubmitted,
    MaterialsWithdrawn,
    LeadAssigned,
    TechsAssigned,
}

impl EventKind {
    /// Canonical wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobCreated => "job_created",
            EventKind::JobUpdated => "job_updated",
            EventKind::JobDeleted => "job_deleted",
            EventKind::JobAcknowledged => "job_acknowledged",
            EventKind::TaskAdded => "task_added",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskRejected => "task_rejected",
            EventKind::ProgressSubmitted => "progress_submitted",
            EventKind::MaterialsWithdrawn => "materials_withdrawn",
            EventKind::LeadAssigned => "lead_assigned",
            EventKind::TechsAssigned => "techs_assigned",
        }
    }
}

/// A fact emitted by the core on a successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEvent {
    pub kind: EventKind,

    /// Role of the intended recipient
    pub recipient_role: Role,

    /// Specific recipient, if the event is addressed rather than broadcast
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,

    /// Job the event relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Free-form event details
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Event addressed to a single recipient.
    pub fn addressed(
        kind: EventKind,
        role: Role,
        recipient_id: impl Into<String>,
        job_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            recipient_role: role,
            recipient_id: Some(recipient_id.into()),
            job_id: Some(job_id.into()),
            payload,
        }
    }

    /// One addressed event per assigned technician.
    pub fn fan_out_to_techs(
        kind: EventKind,
        tech_ids: &[String],
        job_id: &str,
        payload: serde_json::Value,
    ) -> Vec<DomainEvent> {
        tech_ids
            .iter()
            .map(|tech_id| {
                DomainEvent::addressed(kind, Role::Technician, tech_id, job_id, payload.clone())
            })
            .collect()
    }
}

/// A successful mutation plus the domain events it produced.
///
/// The caller owns delivery: pass `events` to [`dispatch`] (or drop them
/// if no notification channel is wired up).
#[derive(Debug)]
pub struct Mutation<T> {
    pub value: T,
    pub events: Vec<DomainEvent>,
}

impl<T> Mutation<T> {
    pub fn new(value: T, events: Vec<DomainEvent>) -> Self {
        Self { value, events }
    }

    /// A mutation that produced no events.
    pub fn silent(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }
}

/// One-way channel the engine publishes domain events to.
///
/// Implementations deliver however they like (push, queue, log). Failures
/// are reported but never roll anything back.
pub trait NotificationPort {
    fn publish(&self, event: &DomainEvent) -> Result<(), NotifyError>;
}

/// Delivery failure from a notification port.
#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Port that logs events instead of delivering them. Default for the
/// daemon and useful in tests.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationPort for LogNotifier {
    fn publish(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        log::info!(
            "event {} job={} recipient={}",
            event.kind.as_str(),
            event.job_id.as_deref().unwrap_or("-"),
            event.recipient_id.as_deref().unwrap_or("*"),
        );
        Ok(())
    }
}

/// Deliver events best-effort. Failures are logged and swallowed.
pub fn dispatch(port: &dyn NotificationPort, events: &[DomainEvent]) {
    for event in events {
        if let Err(e) = port.publish(event) {
            log::warn!("dropping event {}: {}", event.kind.as_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FailingPort;

    impl NotificationPort for FailingPort {
        fn publish(&self, _event: &DomainEvent) -> Result<(), NotifyError> {
            Err(NotifyError("channel down".to_string()))
        }
    }

    struct RecordingPort {
        seen: RefCell<Vec<DomainEvent>>,
    }

    impl NotificationPort for RecordingPort {
        fn publish(&self, event: &DomainEvent) -> Result<(), NotifyError> {
            self.seen.borrow_mut().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_fan_out_one_event_per_tech() {
        let techs = vec!["tech-1".to_string(), "tech-2".to_string()];
        let events = DomainEvent::fan_out_to_techs(
            EventKind::TaskCompleted,
            &techs,
            "wo-abc",
            serde_json::json!({"task_id": "tk-1"}),
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].recipient_id.as_deref(), Some("tech-1"));
        assert_eq!(events[1].recipient_id.as_deref(), Some("tech-2"));
        assert!(events.iter().all(|e| e.job_id.as_deref() == Some("wo-abc")));
    }

    #[test]
    fn test_dispatch_swallows_failures() {
        let events = vec![DomainEvent::addressed(
            EventKind::JobDeleted,
            Role::Technician,
            "tech-1",
            "wo-abc",
            serde_json::json!({}),
        )];

        // Must not panic or propagate
        dispatch(&FailingPort, &events);
    }

    #[test]
    fn test_dispatch_delivers_in_order() {
        let port = RecordingPort {
            seen: RefCell::new(Vec::new()),
        };
        let events = DomainEvent::fan_out_to_techs(
            EventKind::TaskRejected,
            &["a".to_string(), "b".to_string(), "c".to_string()],
            "wo-xyz",
            serde_json::json!({}),
        );

        dispatch(&port, &events);

        let seen = port.seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].recipient_id.as_deref(), Some("a"));
        assert_eq!(seen[2].recipient_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = DomainEvent::addressed(
            EventKind::MaterialsWithdrawn,
            Role::Lead,
            "lead-1",
            "wo-abc",
            serde_json::json!({"lines": 2}),
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
