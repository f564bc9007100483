//! Status conditions recorded on operations requests
//!
//! Each phase transition writes one or more conditions. Conditions are
//! keyed by type: writing a condition whose type is already present replaces
//! it in place, so the list stays ordered by first occurrence.

use serde::{Deserialize, Serialize};

/// Reason codes carried by conditions and mirrored onto events
pub mod reason {
    pub const OPS_TYPE_NOT_SUPPORTED: &str = "OpsTypeNotSupported";
    pub const VALIDATE_FAILED: &str = "ValidateFailed";
    pub const VALIDATE_PASSED: &str = "ValidateOpsRequestPassed";
    pub const CLUSTER_NOT_FOUND: &str = "ClusterNotFound";
    pub const DEPENDENCY_NOT_FOUND: &str = "DependentOpsRequestNotFound";
    pub const QUEUE_FULL: &str = "OpsRequestQueueFull";
    pub const FATAL_FAILED: &str = "OpsRequestFatalFailed";
    pub const SUCCEEDED: &str = "OpsRequestProcessedSuccessfully";
    pub const FAILED: &str = "OpsRequestFailed";
    pub const CANCELLED: &str = "OpsRequestCancelled";
    pub const CANCELLING: &str = "CancelingOpsRequest";
    pub const CANCEL_SUCCEEDED: &str = "CancelSucceed";
    pub const CANCEL_FAILED: &str = "CancelFailed";
}

/// Condition categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Admission checks passed or failed
    Validated,
    /// Handler has started executing
    Progressing,
    /// Cancellation requested or finished
    Cancelled,
    Succeeded,
    Failed,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,

    /// True when the condition holds
    pub status: bool,

    pub reason: String,

    pub message: String,

    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: chrono::Utc::now(),
        }
    }

    /// Admission rejected the request
    pub fn validate_failed(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Validated, false, reason, message)
    }

    pub fn validate_passed(ops_name: &str) -> Self {
        Self::new(
            ConditionType::Validated,
            true,
            reason::VALIDATE_PASSED,
            format!("OpsRequest: {} is validated", ops_name),
        )
    }

    pub fn not_supported(ops_type: impl std::fmt::Display) -> Self {
        Self::validate_failed(
            reason::OPS_TYPE_NOT_SUPPORTED,
            format!("spec.type {} is not supported by operator", ops_type),
        )
    }

    pub fn cluster_not_found(cluster_name: &str) -> Self {
        Self::validate_failed(
            reason::CLUSTER_NOT_FOUND,
            format!("spec.clusterName {} is not found", cluster_name),
        )
    }

    pub fn succeeded(ops_name: &str) -> Self {
        Self::new(
            ConditionType::Succeeded,
            true,
            reason::SUCCEEDED,
            format!("Successfully processed the OpsRequest: {}", ops_name),
        )
    }

    /// Terminal failure; `cause` is the handler or engine error, if any
    pub fn failed(ops_name: &str, cause: Option<&str>) -> Self {
        let message = match cause {
            Some(cause) => format!("Failed to process OpsRequest: {}, error: {}", ops_name, cause),
            None => format!("Failed to process OpsRequest: {}", ops_name),
        };
        Self::new(ConditionType::Failed, false, reason::FAILED, message)
    }

    /// Terminal failure classified by the engine (missing dependency, full queue, ...)
    pub fn fatal(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Failed, false, reason, message)
    }

    /// Cancelled while still pending; nothing was started
    pub fn cancelled(ops_name: &str, detail: Option<&str>) -> Self {
        let message = match detail {
            Some(detail) => format!("OpsRequest: {} is cancelled: {}", ops_name, detail),
            None => format!("OpsRequest: {} is cancelled before it started", ops_name),
        };
        Self::new(ConditionType::Cancelled, true, reason::CANCELLED, message)
    }

    pub fn cancelling(ops_name: &str) -> Self {
        Self::new(
            ConditionType::Cancelled,
            false,
            reason::CANCELLING,
            format!("Start to cancel the OpsRequest: {}", ops_name),
        )
    }

    pub fn cancel_succeeded(ops_name: &str) -> Self {
        Self::new(
            ConditionType::Cancelled,
            true,
            reason::CANCEL_SUCCEEDED,
            format!("Cancel OpsRequest: {} successfully", ops_name),
        )
    }

    pub fn cancel_failed(ops_name: &str, cause: Option<&str>) -> Self {
        let message = match cause {
            Some(cause) => format!("Failed to cancel OpsRequest: {}, error: {}", ops_name, cause),
            None => format!("Failed to cancel OpsRequest: {}", ops_name),
        };
        Self::new(ConditionType::Cancelled, false, reason::CANCEL_FAILED, message)
    }

    /// Whether the condition reports something going wrong
    pub fn is_failure(&self) -> bool {
        match self.condition_type {
            ConditionType::Failed => true,
            ConditionType::Validated => !self.status,
            ConditionType::Cancelled => self.reason == reason::CANCEL_FAILED,
            ConditionType::Progressing | ConditionType::Succeeded => false,
        }
    }
}

/// Insert or replace a condition by type
///
/// The transition time is kept when only the message changes.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            let transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = condition;
            existing.last_transition_time = transition_time;
        }
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_replaces_by_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, Condition::validate_passed("ops-1"));
        set_condition(&mut conditions, Condition::succeeded("ops-1"));
        set_condition(
            &mut conditions,
            Condition::validate_failed(reason::VALIDATE_FAILED, "bad"),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].reason, reason::VALIDATE_FAILED);
        assert_eq!(conditions[1].reason, reason::SUCCEEDED);
    }

    #[test]
    fn test_failure_classification() {
        assert!(Condition::failed("ops", Some("boom")).is_failure());
        assert!(Condition::not_supported("Restart").is_failure());
        assert!(Condition::cancel_failed("ops", None).is_failure());
        assert!(!Condition::cancel_succeeded("ops").is_failure());
        assert!(!Condition::validate_passed("ops").is_failure());
    }

    #[test]
    fn test_cancel_reasons_differ_by_origin() {
        let pending = Condition::cancelled("ops", None);
        let running = Condition::cancel_succeeded("ops");
        assert_ne!(pending.reason, running.reason);
    }
}
