//! Request event stream
//!
//! Every condition the engine persists is mirrored as an event on a
//! broadcast channel for monitoring and audit. Events are derived from the
//! difference between the status before and after a successful write, so a
//! retried write never emits twice.

use dbops_types::{
    Condition, EventSeverity, ObjectKey, OpsEvent, OpsEventEnvelope, OpsObjectRef, OpsPhase,
    OpsRequest, OpsRequestStatus,
};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for the request event stream
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Publishes request events to any number of subscribers
#[derive(Clone)]
pub struct EventRecorder {
    tx: broadcast::Sender<OpsEventEnvelope>,
}

impl EventRecorder {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OpsEventEnvelope> {
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit one event about `ops`
    pub fn record(&self, ops: &OpsRequest, severity: EventSeverity, event: OpsEvent) {
        debug!(
            ops = %ops.key(),
            reason = event.reason(),
            ?severity,
            "Recording event"
        );
        let envelope = OpsEventEnvelope {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity,
            object: OpsObjectRef {
                key: ops.key(),
                uid: ops.metadata.uid,
            },
            event,
        };
        // No subscribers is fine
        let _ = self.tx.send(envelope);
    }

    /// Emit events for everything that changed between `before` and the
    /// stored status of `ops`; returns the number emitted
    pub fn record_status_change(&self, ops: &OpsRequest, before: &OpsRequestStatus) -> usize {
        let after = &ops.status;
        let mut emitted = 0;

        for condition in &after.conditions {
            if before.conditions.iter().any(|c| same_condition(c, condition)) {
                continue;
            }
            let severity = if condition.is_failure() || after.phase == OpsPhase::Failed {
                EventSeverity::Warning
            } else {
                EventSeverity::Normal
            };
            self.record(ops, severity, OpsEvent::from_condition(condition));
            emitted += 1;
        }

        if before.phase != after.phase {
            let severity = match after.phase {
                OpsPhase::Failed => EventSeverity::Warning,
                _ => EventSeverity::Normal,
            };
            self.record(
                ops,
                severity,
                OpsEvent::PhaseChanged {
                    from: before.phase,
                    to: after.phase,
                },
            );
            emitted += 1;
        }
        emitted
    }

    /// The request released its admission queue entry
    pub fn record_dequeued(&self, ops: &OpsRequest, cluster: ObjectKey) {
        self.record(ops, EventSeverity::Normal, OpsEvent::Dequeued { cluster });
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn same_condition(a: &Condition, b: &Condition) -> bool {
    a.condition_type == b.condition_type
        && a.status == b.status
        && a.reason == b.reason
        && a.message == b.message
}
