//! Admission queue entries
//!
//! The queue is an ordered list stored as JSON in a cluster annotation.
//! Only requests whose operation promises a target cluster phase are
//! recorded here.

use crate::ops_request::OpsType;
use crate::phase::ClusterPhase;
use serde::{Deserialize, Serialize};

/// One admission queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsRecorder {
    /// Request name (unique within the queue)
    pub name: String,

    #[serde(rename = "type")]
    pub ops_type: OpsType,

    /// Cluster phase the operation drives the cluster into
    pub target_phase: ClusterPhase,

    /// True while the request waits behind the queue head
    #[serde(default)]
    pub in_queue: bool,
}

impl OpsRecorder {
    pub fn new(name: impl Into<String>, ops_type: OpsType, target_phase: ClusterPhase) -> Self {
        Self {
            name: name.into(),
            ops_type,
            target_phase,
            in_queue: true,
        }
    }
}

/// Position of `name` in the queue
pub fn position(queue: &[OpsRecorder], name: &str) -> Option<usize> {
    queue.iter().position(|r| r.name == name)
}
