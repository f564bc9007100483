//! Events derived from request status changes

use crate::condition::{Condition, ConditionType};
use crate::meta::ObjectKey;
use crate::phase::OpsPhase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every request event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub severity: EventSeverity,

    /// The request the event is about
    pub object: OpsObjectRef,

    pub event: OpsEvent,
}

/// Identity of the request an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsObjectRef {
    pub key: ObjectKey,
    pub uid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpsEvent {
    /// A condition was persisted on the request
    ConditionRecorded {
        condition_type: ConditionType,
        reason: String,
        message: String,
    },

    /// The request moved between phases
    PhaseChanged { from: OpsPhase, to: OpsPhase },

    /// The request released its admission queue entry
    Dequeued { cluster: ObjectKey },
}

impl OpsEvent {
    pub fn from_condition(condition: &Condition) -> Self {
        Self::ConditionRecorded {
            condition_type: condition.condition_type,
            reason: condition.reason.clone(),
            message: condition.message.clone(),
        }
    }

    /// Short machine-readable reason
    pub fn reason(&self) -> &str {
        match self {
            Self::ConditionRecorded { reason, .. } => reason,
            Self::PhaseChanged { .. } => "PhaseChanged",
            Self::Dequeued { .. } => "Dequeued",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::ConditionRecorded { message, .. } => message.clone(),
            Self::PhaseChanged { from, to } => format!("phase changed from {} to {}", from, to),
            Self::Dequeued { cluster } => format!("released admission queue entry on {}", cluster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::reason;

    #[test]
    fn test_event_from_condition() {
        let condition = Condition::failed("ops-1", Some("boom"));
        let event = OpsEvent::from_condition(&condition);
        assert_eq!(event.reason(), reason::FAILED);
        assert!(event.message().contains("boom"));
    }

    #[test]
    fn test_phase_change_message() {
        let event = OpsEvent::PhaseChanged {
            from: OpsPhase::Pending,
            to: OpsPhase::Creating,
        };
        assert_eq!(event.message(), "phase changed from Pending to Creating");
    }
}
