//! Lifecycle phases for requests, clusters and components

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of an operations request
///
/// `Pending → Creating → Running → {Succeeded | Failed}`, with
/// `Cancelling → Cancelled` reachable from `Running` and `Cancelled`
/// reachable directly from `Pending`. Terminal phases never change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpsPhase {
    #[default]
    Pending,
    Creating,
    Running,
    Cancelling,
    Cancelled,
    Succeeded,
    Failed,
}

impl OpsPhase {
    /// Succeeded, Failed or Cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: OpsPhase) -> bool {
        use OpsPhase::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (from, to) if *from == to => true,
            (Pending, Creating | Cancelled | Failed) => true,
            (Creating, Running | Failed) => true,
            (Running, Cancelling | Succeeded | Failed) => true,
            (Cancelling, Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OpsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Cancelling => "Cancelling",
            Self::Cancelled => "Cancelled",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Phase of the target cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterPhase {
    #[default]
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Deleting,
    Failed,
    Abnormal,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Phase of a single cluster component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentPhase {
    #[default]
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Starting,
    Failed,
    Abnormal,
}

impl ComponentPhase {
    pub fn is_failed_or_abnormal(&self) -> bool {
        matches!(self, Self::Failed | Self::Abnormal)
    }

    /// The component has settled, either healthy or broken
    pub fn is_completed(&self) -> bool {
        self.is_failed_or_abnormal() || *self == Self::Running
    }
}

impl fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
