//! Cross-request "depends on successful ops" resolution

use crate::error::{OpsError, Result};
use dbops_store::{retry_on_conflict, BackoffConfig, ResourceStore};
use dbops_types::{reason, ObjectKey, OpsPhase, OpsRequest};
use tracing::{debug, instrument};

/// Outcome of checking a request's prerequisites
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyResolution {
    /// Every prerequisite succeeded (or there are none)
    Ready,
    /// At least one prerequisite is still in progress
    NotReady { waiting_on: String },
    /// A prerequisite failed or was cancelled; the dependent must be cancelled
    Cancel { dependency: String, phase: OpsPhase },
}

/// Check the prerequisites of `ops` and record it as their dependent
///
/// A prerequisite that does not exist is fatal. The back-reference written
/// onto each prerequisite is idempotent.
#[instrument(skip(store, retry, ops), fields(ops = %ops.key()))]
pub async fn resolve_dependencies(
    store: &dyn ResourceStore,
    retry: &BackoffConfig,
    ops: &OpsRequest,
) -> Result<DependencyResolution> {
    let names = ops.depends_on();
    if names.is_empty() {
        return Ok(DependencyResolution::Ready);
    }

    let namespace = &ops.metadata.namespace;
    let mut prerequisites = Vec::with_capacity(names.len());
    for name in &names {
        let key = ObjectKey::new(namespace.clone(), name.clone());
        match store.get_ops_request(&key).await? {
            Some(dep) => prerequisites.push(dep),
            None => {
                return Err(OpsError::fatal(
                    reason::DEPENDENCY_NOT_FOUND,
                    format!("dependent OpsRequest {} is not found", key),
                ))
            }
        }
    }

    for dep in &mut prerequisites {
        if dep.related_ops().iter().any(|r| r == ops.name()) {
            continue;
        }
        *dep = add_related_op(store, retry, &dep.key(), ops.name()).await?;
    }

    let mut waiting_on = None;
    for dep in &prerequisites {
        match dep.phase() {
            OpsPhase::Failed | OpsPhase::Cancelled => {
                debug!(dependency = dep.name(), phase = %dep.phase(), "Prerequisite did not succeed");
                return Ok(DependencyResolution::Cancel {
                    dependency: dep.name().to_string(),
                    phase: dep.phase(),
                });
            }
            OpsPhase::Succeeded => {}
            _ => {
                waiting_on.get_or_insert_with(|| dep.name().to_string());
            }
        }
    }

    Ok(match waiting_on {
        Some(waiting_on) => {
            debug!(%waiting_on, "Waiting for prerequisite");
            DependencyResolution::NotReady { waiting_on }
        }
        None => DependencyResolution::Ready,
    })
}

async fn add_related_op(
    store: &dyn ResourceStore,
    retry: &BackoffConfig,
    key: &ObjectKey,
    dependent: &str,
) -> Result<OpsRequest> {
    retry_on_conflict(retry, move || async move {
        let mut dep = store.get_ops_request(key).await?.ok_or_else(|| {
            OpsError::fatal(
                reason::DEPENDENCY_NOT_FOUND,
                format!("dependent OpsRequest {} is not found", key),
            )
        })?;
        if !dep.add_related_op(dependent) {
            return Ok(dep);
        }
        Ok::<_, OpsError>(store.update_ops_request(&dep).await?)
    })
    .await
}
