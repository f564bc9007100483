//! Read-mostly view of a target cluster
//!
//! The engine never changes cluster business state. Its only cluster writes
//! append to or remove from the admission queue annotation.

use crate::meta::{ObjectKey, ObjectMeta};
use crate::ops_request::annotations;
use crate::phase::{ClusterPhase, ComponentPhase};
use crate::recorder::OpsRecorder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub component_specs: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,
    /// Desired replica count
    pub replicas: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,

    #[serde(default)]
    pub components: BTreeMap<String, ClusterComponentStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterComponentStatus {
    #[serde(default)]
    pub phase: ComponentPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Cluster {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: ClusterSpec::default(),
            status: ClusterStatus::default(),
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, replicas: u32) -> Self {
        self.spec.component_specs.push(ComponentSpec {
            name: name.into(),
            replicas,
        });
        self
    }

    pub fn with_phase(mut self, phase: ClusterPhase) -> Self {
        self.status.phase = phase;
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn phase(&self) -> ClusterPhase {
        self.status.phase
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.spec.component_specs.iter().find(|c| c.name == name)
    }

    /// Desired replicas keyed by component name
    pub fn component_replicas(&self) -> BTreeMap<String, u32> {
        self.spec
            .component_specs
            .iter()
            .map(|c| (c.name.clone(), c.replicas))
            .collect()
    }

    /// Decode the admission queue
    pub fn ops_queue(&self) -> Result<Vec<OpsRecorder>, serde_json::Error> {
        match self.metadata.annotation(annotations::OPS_REQUEST_QUEUE) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }

    /// Encode the admission queue; an empty queue removes the annotation
    pub fn set_ops_queue(&mut self, queue: &[OpsRecorder]) -> Result<(), serde_json::Error> {
        if queue.is_empty() {
            self.metadata.remove_annotation(annotations::OPS_REQUEST_QUEUE);
            return Ok(());
        }
        let raw = serde_json::to_string(queue)?;
        self.metadata
            .set_annotation(annotations::OPS_REQUEST_QUEUE, raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops_request::OpsType;

    #[test]
    fn test_ops_queue_roundtrip_and_clear() {
        let mut cluster = Cluster::new("default", "pg").with_component("postgresql", 3);
        assert!(cluster.ops_queue().unwrap().is_empty());

        let queue = vec![OpsRecorder::new(
            "ops-1",
            OpsType::Restart,
            ClusterPhase::Updating,
        )];
        cluster.set_ops_queue(&queue).unwrap();
        assert_eq!(cluster.ops_queue().unwrap(), queue);

        cluster.set_ops_queue(&[]).unwrap();
        assert!(cluster
            .metadata
            .annotation(annotations::OPS_REQUEST_QUEUE)
            .is_none());
    }

    #[test]
    fn test_corrupt_queue_is_an_error() {
        let mut cluster = Cluster::new("default", "pg");
        cluster
            .metadata
            .set_annotation(annotations::OPS_REQUEST_QUEUE, "not-json");
        assert!(cluster.ops_queue().is_err());
    }

    #[test]
    fn test_component_lookup() {
        let cluster = Cluster::new("default", "pg")
            .with_component("postgresql", 3)
            .with_component("pgbouncer", 1);
        assert_eq!(cluster.component("pgbouncer").map(|c| c.replicas), Some(1));
        assert!(cluster.component("redis").is_none());
        assert_eq!(cluster.component_replicas().len(), 2);
    }
}
