//! dbops Types - Core types for the operations control plane
//!
//! An operations request is an imperative action (scale, restart, upgrade,
//! stop/start, switchover, reconfigure) submitted against a long-lived,
//! declaratively managed database cluster. These types are the persisted
//! shape of requests and clusters as seen through the resource store.
//!
//! ## Key Concepts
//!
//! - **OpsRequest**: A single imperative action and its lifecycle status
//! - **Cluster**: Read-mostly view of the target; carries the admission queue
//! - **OpsRecorder**: One admission queue entry stored on the cluster
//! - **Condition**: Reason/message record appended on every phase transition
//! - **Events**: Observability stream derived from conditions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cluster;
pub mod condition;
pub mod events;
pub mod meta;
pub mod ops_request;
pub mod phase;
pub mod reconfigure;
pub mod recorder;

// Re-export main types
pub use cluster::{Cluster, ClusterComponentStatus, ClusterSpec, ClusterStatus, ComponentSpec};
pub use condition::{reason, set_condition, Condition, ConditionType};
pub use events::{EventSeverity, OpsEvent, OpsEventEnvelope, OpsObjectRef};
pub use meta::{ObjectKey, ObjectMeta};
pub use ops_request::{
    annotations, ComponentOps, ConfigurationItem, CustomOpsSpec, HorizontalScaling,
    LastComponentConfiguration, LastConfiguration, OpsComponentStatus, OpsRequest, OpsRequestSpec,
    OpsRequestStatus, OpsType, OverrideBy, ReconfigureSpec, SpecValidationError, Switchover,
    Upgrade, VerticalScaling,
};
pub use phase::{ClusterPhase, ComponentPhase, OpsPhase};
pub use reconfigure::{ConfigurationItemStatus, ReconfigurePhase, ReconfiguringStatus};
pub use recorder::OpsRecorder;
