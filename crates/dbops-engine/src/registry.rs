//! Operation registry
//!
//! Maps each operation type to its static behaviour. Built once at startup
//! and shared read-only; there is no way to add entries to a built registry.

use crate::error::{OpsError, Result};
use crate::handler::OpsHandler;
use dbops_types::{ClusterPhase, OpsType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Static per-type policy
#[derive(Clone)]
pub struct OpsBehaviour {
    /// Cluster phases from which the operation may be admitted; empty means any
    pub from_cluster_phases: Vec<ClusterPhase>,

    /// Phase the operation drives the cluster into; `Some` makes it
    /// exclusive through the admission queue
    pub to_cluster_phase: Option<ClusterPhase>,

    /// Creates the cluster, so neither the cluster nor its phase is checked
    pub is_cluster_creation: bool,

    /// The handler can abort a running request
    pub cancel_supported: bool,

    pub handler: Arc<dyn OpsHandler>,
}

impl OpsBehaviour {
    pub fn new(handler: Arc<dyn OpsHandler>) -> Self {
        Self {
            from_cluster_phases: Vec::new(),
            to_cluster_phase: None,
            is_cluster_creation: false,
            cancel_supported: false,
            handler,
        }
    }

    pub fn from_phases(mut self, phases: &[ClusterPhase]) -> Self {
        self.from_cluster_phases = phases.to_vec();
        self
    }

    pub fn to_phase(mut self, phase: ClusterPhase) -> Self {
        self.to_cluster_phase = Some(phase);
        self
    }

    pub fn cluster_creation(mut self) -> Self {
        self.is_cluster_creation = true;
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.cancel_supported = true;
        self
    }
}

impl fmt::Debug for OpsBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpsBehaviour")
            .field("from_cluster_phases", &self.from_cluster_phases)
            .field("to_cluster_phase", &self.to_cluster_phase)
            .field("is_cluster_creation", &self.is_cluster_creation)
            .field("cancel_supported", &self.cancel_supported)
            .finish_non_exhaustive()
    }
}

/// Immutable type → behaviour table
#[derive(Debug, Default)]
pub struct OpsRegistry {
    behaviours: HashMap<OpsType, OpsBehaviour>,
}

impl OpsRegistry {
    pub fn builder() -> OpsRegistryBuilder {
        OpsRegistryBuilder::default()
    }

    pub fn lookup(&self, ops_type: OpsType) -> Option<&OpsBehaviour> {
        self.behaviours.get(&ops_type)
    }

    pub fn supported_types(&self) -> Vec<OpsType> {
        let mut types: Vec<OpsType> = self.behaviours.keys().copied().collect();
        types.sort();
        types
    }
}

/// Collects behaviours before the registry is frozen
#[derive(Debug, Default)]
pub struct OpsRegistryBuilder {
    behaviours: HashMap<OpsType, OpsBehaviour>,
}

impl OpsRegistryBuilder {
    /// Register a behaviour; each type may be registered once
    pub fn register(mut self, ops_type: OpsType, behaviour: OpsBehaviour) -> Result<Self> {
        if self.behaviours.contains_key(&ops_type) {
            return Err(OpsError::AlreadyRegistered(ops_type));
        }
        self.behaviours.insert(ops_type, behaviour);
        Ok(self)
    }

    pub fn build(self) -> OpsRegistry {
        OpsRegistry {
            behaviours: self.behaviours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MockOpsHandler;

    fn behaviour() -> OpsBehaviour {
        OpsBehaviour::new(Arc::new(MockOpsHandler::succeeding_after(1)))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = OpsRegistry::builder()
            .register(
                OpsType::Restart,
                behaviour()
                    .from_phases(&[ClusterPhase::Running])
                    .to_phase(ClusterPhase::Updating),
            )
            .unwrap()
            .build();

        let found = registry.lookup(OpsType::Restart).unwrap();
        assert_eq!(found.to_cluster_phase, Some(ClusterPhase::Updating));
        assert!(registry.lookup(OpsType::Upgrade).is_none());
        assert_eq!(registry.supported_types(), vec![OpsType::Restart]);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = OpsRegistry::builder()
            .register(OpsType::Stop, behaviour())
            .unwrap()
            .register(OpsType::Stop, behaviour());
        assert!(matches!(result, Err(OpsError::AlreadyRegistered(OpsType::Stop))));
    }
}
