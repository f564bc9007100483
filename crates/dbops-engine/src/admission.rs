//! Admission checks for pending requests
//!
//! Validation failures are terminal. A cluster in the wrong phase only
//! delays admission, and only until the request's wait TTL runs out; after
//! that the request is admitted whatever the cluster phase.

use crate::definition::OpsDefinitionResolver;
use crate::error::{OpsError, Result};
use crate::registry::OpsBehaviour;
use dbops_types::{Cluster, OpsRequest, OpsType};
use tracing::debug;

/// Structural validation of a request against its cluster
///
/// Custom requests are checked against their resolved definition.
pub async fn validate_request(
    ops: &OpsRequest,
    cluster: Option<&Cluster>,
    behaviour: &OpsBehaviour,
    resolver: Option<&dyn OpsDefinitionResolver>,
) -> Result<()> {
    ops.validate(cluster, !behaviour.is_cluster_creation)?;

    if ops.spec.ops_type != OpsType::Custom {
        return Ok(());
    }
    let custom = ops
        .spec
        .custom
        .as_ref()
        .ok_or_else(|| OpsError::Validation("spec.custom is required".into()))?;
    let resolver = resolver.ok_or_else(|| {
        OpsError::Validation("custom operations are not enabled".into())
    })?;
    let definition = resolver
        .resolve(&custom.ops_definition_name)
        .await?
        .ok_or_else(|| {
            OpsError::Validation(format!(
                "OpsDefinition {} is not found",
                custom.ops_definition_name
            ))
        })?;
    let merged = definition.validate(custom, cluster)?;
    debug!(definition = %definition.name, params = merged.len(), "Custom parameters resolved");
    Ok(())
}

/// Whether the cluster phase allows admission now
///
/// Returns [`OpsError::WaitForClusterPhase`] while the request should keep
/// waiting.
pub fn check_cluster_phase(
    ops: &OpsRequest,
    cluster: Option<&Cluster>,
    behaviour: &OpsBehaviour,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    if ops.spec.force || behaviour.from_cluster_phases.is_empty() || behaviour.is_cluster_creation {
        return Ok(());
    }
    let Some(cluster) = cluster else {
        return Ok(());
    };
    let current = cluster.phase();
    if behaviour.from_cluster_phases.contains(&current) {
        return Ok(());
    }
    if ops.wait_ttl_elapsed(now) {
        debug!(
            cluster_phase = %current,
            "Cluster phase not allowed but the wait TTL has elapsed, admitting"
        );
        return Ok(());
    }
    Err(OpsError::WaitForClusterPhase {
        current,
        expected: behaviour.from_cluster_phases.clone(),
    })
}
