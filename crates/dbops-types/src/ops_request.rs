//! Operations request: the unit of work
//!
//! A request is created externally, mutated only through the engine's status
//! patches, and never deleted by the engine.

use crate::cluster::Cluster;
use crate::condition::Condition;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::phase::{ComponentPhase, OpsPhase};
use crate::reconfigure::ReconfiguringStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Annotation keys used by the engine
pub mod annotations {
    /// Comma-separated names of requests that must succeed first
    pub const DEPENDS_ON_SUCCESSFUL_OPS: &str = "ops.dbops.io/depends-on-successful-ops";

    /// Comma-separated names of requests depending on this one
    pub const RELATED_OPS: &str = "ops.dbops.io/related-ops";

    /// JSON map of component name to replicas, recorded by Stop for a later Start
    pub const COMPONENT_REPLICAS: &str = "ops.dbops.io/components-replicas";

    /// JSON list of admission queue entries, stored on the cluster
    pub const OPS_REQUEST_QUEUE: &str = "ops.dbops.io/ops-request";
}

/// Supported operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpsType {
    Upgrade,
    VerticalScaling,
    HorizontalScaling,
    Restart,
    Switchover,
    Stop,
    Start,
    Reconfiguring,
    /// Defined by an external operation definition
    Custom,
}

impl OpsType {
    /// Types that change component replica counts
    pub fn scales_replicas(&self) -> bool {
        matches!(self, Self::HorizontalScaling | Self::Stop | Self::Start)
    }
}

impl fmt::Display for OpsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An operations request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsRequest {
    pub metadata: ObjectMeta,
    pub spec: OpsRequestSpec,
    #[serde(default)]
    pub status: OpsRequestStatus,
}

/// Desired operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsRequestSpec {
    /// Target cluster, in the request's namespace
    pub cluster_name: String,

    #[serde(rename = "type")]
    pub ops_type: OpsType,

    /// Request cancellation; observed at phase boundaries only
    #[serde(default)]
    pub cancel: bool,

    /// Skip the cluster phase precondition
    #[serde(default)]
    pub force: bool,

    /// How long admission may wait for an allowed cluster phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_before_abort: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub horizontal_scaling: Vec<HorizontalScaling>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertical_scaling: Vec<VerticalScaling>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restart: Vec<ComponentOps>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switchover: Vec<Switchover>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconfigure: Option<ReconfigureSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<Upgrade>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomOpsSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOps {
    pub component_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalScaling {
    pub component_name: String,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalScaling {
    pub component_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Switchover {
    pub component_name: String,
    /// Instance to promote; `*` lets the component pick
    pub instance_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub service_version: String,
}

/// Multi-file configuration change on one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureSpec {
    pub component_name: String,
    pub configurations: Vec<ConfigurationItem>,
}

/// Changes to one configuration template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    /// Configuration template name
    pub name: String,
    /// File name → parameter → new value (`None` removes the parameter)
    pub keys: BTreeMap<String, BTreeMap<String, Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomOpsSpec {
    pub ops_definition_name: String,
    #[serde(default)]
    pub component_name: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Observed state of a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsRequestStatus {
    #[serde(default)]
    pub phase: OpsPhase,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Per-component progress
    #[serde(default)]
    pub components: BTreeMap<String, OpsComponentStatus>,

    /// Component configuration before the operation applied
    #[serde(default)]
    pub last_configuration: LastConfiguration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconfiguring_status: Option<ReconfiguringStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsComponentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ComponentPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set when a later request's effect superseded this one on the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_by: Option<OverrideBy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideBy {
    /// Empty when no running request explains the observed value
    pub ops_name: String,
    #[serde(flatten)]
    pub last_component_configuration: LastComponentConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastComponentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastConfiguration {
    #[serde(default)]
    pub components: BTreeMap<String, LastComponentConfiguration>,
}

impl OpsRequest {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        ops_type: OpsType,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: OpsRequestSpec {
                cluster_name: cluster_name.into(),
                ops_type,
                cancel: false,
                force: false,
                ttl_seconds_before_abort: None,
                horizontal_scaling: Vec::new(),
                vertical_scaling: Vec::new(),
                restart: Vec::new(),
                switchover: Vec::new(),
                reconfigure: None,
                upgrade: None,
                custom: None,
            },
            status: OpsRequestStatus::default(),
        }
    }

    pub fn with_horizontal_scaling(mut self, component: impl Into<String>, replicas: u32) -> Self {
        self.spec.horizontal_scaling.push(HorizontalScaling {
            component_name: component.into(),
            replicas,
        });
        self
    }

    pub fn with_restart(mut self, component: impl Into<String>) -> Self {
        self.spec.restart.push(ComponentOps {
            component_name: component.into(),
        });
        self
    }

    pub fn with_ttl_seconds(mut self, ttl: u64) -> Self {
        self.spec.ttl_seconds_before_abort = Some(ttl);
        self
    }

    pub fn with_depends_on(mut self, names: &[&str]) -> Self {
        self.metadata
            .set_annotation(annotations::DEPENDS_ON_SUCCESSFUL_OPS, names.join(","));
        self
    }

    pub fn with_custom(mut self, custom: CustomOpsSpec) -> Self {
        self.spec.custom = Some(custom);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn cluster_key(&self) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.spec.cluster_name.clone())
    }

    pub fn phase(&self) -> OpsPhase {
        self.status.phase
    }

    pub fn is_complete(&self) -> bool {
        self.status.phase.is_terminal()
    }

    /// Whether the admission wait has run out at `now`
    ///
    /// A request without a TTL never waits.
    pub fn wait_ttl_elapsed(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.spec.ttl_seconds_before_abort {
            None => true,
            Some(ttl) => {
                let secs = i64::try_from(ttl).unwrap_or(i64::MAX).min(i64::MAX / 1000);
                match self
                    .metadata
                    .creation_timestamp
                    .checked_add_signed(chrono::Duration::seconds(secs))
                {
                    Some(deadline) => now > deadline,
                    None => false,
                }
            }
        }
    }

    /// Names of prerequisite requests
    pub fn depends_on(&self) -> Vec<String> {
        split_names(self.metadata.annotation(annotations::DEPENDS_ON_SUCCESSFUL_OPS))
    }

    /// Names of requests that declared a dependency on this one
    pub fn related_ops(&self) -> Vec<String> {
        split_names(self.metadata.annotation(annotations::RELATED_OPS))
    }

    /// Record `name` as a dependent; returns false if already present
    pub fn add_related_op(&mut self, name: &str) -> bool {
        let mut related = self.related_ops();
        if related.iter().any(|r| r == name) {
            return false;
        }
        related.push(name.to_string());
        self.metadata
            .set_annotation(annotations::RELATED_OPS, related.join(","));
        true
    }

    /// Component replicas recorded for a later Start
    pub fn component_replicas_snapshot(&self) -> Result<BTreeMap<String, u32>, serde_json::Error> {
        match self.metadata.annotation(annotations::COMPONENT_REPLICAS) {
            None | Some("") => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }

    pub fn set_component_replicas_snapshot(
        &mut self,
        snapshot: &BTreeMap<String, u32>,
    ) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_string(snapshot)?;
        self.metadata
            .set_annotation(annotations::COMPONENT_REPLICAS, raw);
        Ok(())
    }

    /// Components this request acts on
    pub fn target_components(&self) -> BTreeSet<String> {
        let spec = &self.spec;
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.extend(spec.horizontal_scaling.iter().map(|h| h.component_name.clone()));
        names.extend(spec.vertical_scaling.iter().map(|v| v.component_name.clone()));
        names.extend(spec.restart.iter().map(|r| r.component_name.clone()));
        names.extend(spec.switchover.iter().map(|s| s.component_name.clone()));
        if let Some(r) = &spec.reconfigure {
            names.insert(r.component_name.clone());
        }
        if let Some(c) = spec.custom.as_ref().and_then(|c| c.component_name.clone()) {
            names.insert(c);
        }
        names
    }

    /// Structural validation against the target cluster
    ///
    /// `need_cluster` is false for cluster-creation operations. Custom
    /// operations are only checked for shape here; their parameters are
    /// validated once the definition has been resolved.
    pub fn validate(
        &self,
        cluster: Option<&Cluster>,
        need_cluster: bool,
    ) -> Result<(), SpecValidationError> {
        let cluster = match (cluster, need_cluster) {
            (Some(cluster), _) => Some(cluster),
            (None, true) => {
                return Err(SpecValidationError::ClusterNotFound(
                    self.spec.cluster_name.clone(),
                ))
            }
            (None, false) => None,
        };

        let spec = &self.spec;
        match spec.ops_type {
            OpsType::HorizontalScaling => {
                require_non_empty("spec.horizontalScaling", spec.horizontal_scaling.len())?;
                let names: Vec<&str> = spec
                    .horizontal_scaling
                    .iter()
                    .map(|h| h.component_name.as_str())
                    .collect();
                check_components(cluster, &names)?;
            }
            OpsType::VerticalScaling => {
                require_non_empty("spec.verticalScaling", spec.vertical_scaling.len())?;
                for v in &spec.vertical_scaling {
                    if v.cpu.is_none() && v.memory.is_none() {
                        return Err(SpecValidationError::InvalidField(format!(
                            "spec.verticalScaling[{}]: cpu or memory is required",
                            v.component_name
                        )));
                    }
                }
                let names: Vec<&str> = spec
                    .vertical_scaling
                    .iter()
                    .map(|v| v.component_name.as_str())
                    .collect();
                check_components(cluster, &names)?;
            }
            OpsType::Restart => {
                require_non_empty("spec.restart", spec.restart.len())?;
                let names: Vec<&str> =
                    spec.restart.iter().map(|r| r.component_name.as_str()).collect();
                check_components(cluster, &names)?;
            }
            OpsType::Switchover => {
                require_non_empty("spec.switchover", spec.switchover.len())?;
                if let Some(s) = spec.switchover.iter().find(|s| s.instance_name.is_empty()) {
                    return Err(SpecValidationError::InvalidField(format!(
                        "spec.switchover[{}].instanceName cannot be empty",
                        s.component_name
                    )));
                }
                let names: Vec<&str> = spec
                    .switchover
                    .iter()
                    .map(|s| s.component_name.as_str())
                    .collect();
                check_components(cluster, &names)?;
            }
            OpsType::Reconfiguring => {
                let reconfigure = spec
                    .reconfigure
                    .as_ref()
                    .ok_or_else(|| SpecValidationError::MissingField("spec.reconfigure".into()))?;
                require_non_empty("spec.reconfigure.configurations", reconfigure.configurations.len())?;
                check_components(cluster, &[reconfigure.component_name.as_str()])?;
            }
            OpsType::Upgrade => {
                let upgrade = spec
                    .upgrade
                    .as_ref()
                    .ok_or_else(|| SpecValidationError::MissingField("spec.upgrade".into()))?;
                if upgrade.service_version.is_empty() {
                    return Err(SpecValidationError::InvalidField(
                        "spec.upgrade.serviceVersion cannot be empty".into(),
                    ));
                }
            }
            OpsType::Custom => {
                let custom = spec
                    .custom
                    .as_ref()
                    .ok_or_else(|| SpecValidationError::MissingField("spec.custom".into()))?;
                if custom.ops_definition_name.is_empty() {
                    return Err(SpecValidationError::InvalidField(
                        "spec.custom.opsDefinitionName cannot be empty".into(),
                    ));
                }
                if let Some(component) = &custom.component_name {
                    check_components(cluster, &[component.as_str()])?;
                }
            }
            OpsType::Stop | OpsType::Start => {}
        }
        Ok(())
    }
}

fn split_names(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn require_non_empty(field: &str, len: usize) -> Result<(), SpecValidationError> {
    if len == 0 {
        return Err(SpecValidationError::MissingField(field.to_string()));
    }
    Ok(())
}

fn check_components(cluster: Option<&Cluster>, names: &[&str]) -> Result<(), SpecValidationError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(*name) {
            return Err(SpecValidationError::DuplicateComponent(name.to_string()));
        }
        if let Some(cluster) = cluster {
            if cluster.component(name).is_none() {
                return Err(SpecValidationError::ComponentNotFound {
                    component: name.to_string(),
                    cluster: cluster.metadata.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecValidationError {
    #[error("cluster {0} is not found")]
    ClusterNotFound(String),

    #[error("{0} is required")]
    MissingField(String),

    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("component {component} is not found in cluster {cluster}")]
    ComponentNotFound { component: String, cluster: String },

    #[error("component {0} is specified more than once")]
    DuplicateComponent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;

    fn cluster() -> Cluster {
        Cluster::new("default", "pg").with_component("postgresql", 3)
    }

    #[test]
    fn test_depends_on_parsing() {
        let ops = OpsRequest::new("default", "ops-2", "pg", OpsType::Restart)
            .with_depends_on(&["ops-1", " ops-0 ", ""]);
        assert_eq!(ops.depends_on(), vec!["ops-1".to_string(), "ops-0".to_string()]);
    }

    #[test]
    fn test_add_related_op_is_idempotent() {
        let mut ops = OpsRequest::new("default", "ops-1", "pg", OpsType::Restart);
        assert!(ops.add_related_op("ops-2"));
        assert!(!ops.add_related_op("ops-2"));
        assert!(ops.add_related_op("ops-3"));
        assert_eq!(
            ops.metadata.annotation(annotations::RELATED_OPS),
            Some("ops-2,ops-3")
        );
    }

    #[test]
    fn test_wait_ttl() {
        let now = chrono::Utc::now();
        let mut ops = OpsRequest::new("default", "ops-1", "pg", OpsType::Restart);
        assert!(ops.wait_ttl_elapsed(now));

        ops = ops.with_ttl_seconds(60);
        ops.metadata.creation_timestamp = now;
        assert!(!ops.wait_ttl_elapsed(now + chrono::Duration::seconds(30)));
        assert!(ops.wait_ttl_elapsed(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_validate_horizontal_scaling() {
        let cluster = cluster();
        let ok = OpsRequest::new("default", "ops-1", "pg", OpsType::HorizontalScaling)
            .with_horizontal_scaling("postgresql", 5);
        assert!(ok.validate(Some(&cluster), true).is_ok());

        let empty = OpsRequest::new("default", "ops-2", "pg", OpsType::HorizontalScaling);
        assert!(matches!(
            empty.validate(Some(&cluster), true),
            Err(SpecValidationError::MissingField(_))
        ));

        let unknown = OpsRequest::new("default", "ops-3", "pg", OpsType::HorizontalScaling)
            .with_horizontal_scaling("redis", 1);
        assert!(matches!(
            unknown.validate(Some(&cluster), true),
            Err(SpecValidationError::ComponentNotFound { .. })
        ));

        let dup = OpsRequest::new("default", "ops-4", "pg", OpsType::HorizontalScaling)
            .with_horizontal_scaling("postgresql", 1)
            .with_horizontal_scaling("postgresql", 2);
        assert!(matches!(
            dup.validate(Some(&cluster), true),
            Err(SpecValidationError::DuplicateComponent(_))
        ));
    }

    #[test]
    fn test_validate_without_cluster() {
        let ops = OpsRequest::new("default", "ops-1", "pg", OpsType::Restart).with_restart("pg");
        assert!(matches!(
            ops.validate(None, true),
            Err(SpecValidationError::ClusterNotFound(_))
        ));
        assert!(ops.validate(None, false).is_ok());
    }

    #[test]
    fn test_component_replicas_snapshot() {
        let mut ops = OpsRequest::new("default", "stop-1", "pg", OpsType::Stop);
        assert!(ops.component_replicas_snapshot().unwrap().is_empty());

        let mut snapshot = BTreeMap::new();
        snapshot.insert("postgresql".to_string(), 3);
        ops.set_component_replicas_snapshot(&snapshot).unwrap();
        assert_eq!(ops.component_replicas_snapshot().unwrap(), snapshot);
    }
}
