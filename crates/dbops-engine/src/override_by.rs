//! Supersession bookkeeping between concurrent replica-changing requests
//!
//! When a forced request runs alongside another one that changes the same
//! component's replicas, the later write wins. The earlier request then
//! records which request explains the replica count it now observes. This
//! is observational only and never changes scheduling.

use crate::error::Result;
use crate::handler::OpsResource;
use dbops_store::ResourceStore;
use dbops_types::{
    Cluster, LastComponentConfiguration, ObjectKey, OpsPhase, OpsRequest, OpsType, OverrideBy,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Request types whose effect is a replica count
pub const SCALE_REPLICAS_TYPES: [OpsType; 3] =
    [OpsType::HorizontalScaling, OpsType::Stop, OpsType::Start];

/// Running requests of the given types that execute concurrently on `cluster`
///
/// Newest first, following admission order. Empty when at most one such
/// request is released, since nothing can be superseded then. Requests that
/// have been deleted are skipped.
pub async fn running_ops_with_same_kind(
    store: &dyn ResourceStore,
    cluster: &Cluster,
    types: &[OpsType],
) -> Result<Vec<OpsRequest>> {
    let names: Vec<String> = cluster
        .ops_queue()?
        .into_iter()
        .filter(|r| types.contains(&r.ops_type) && !r.in_queue)
        .map(|r| r.name)
        .collect();
    if names.len() <= 1 {
        return Ok(Vec::new());
    }

    let mut running = Vec::with_capacity(names.len());
    for name in names.iter().rev() {
        let key = ObjectKey::new(cluster.metadata.namespace.clone(), name.clone());
        match store.get_ops_request(&key).await? {
            Some(ops) if ops.phase() == OpsPhase::Running => running.push(ops),
            Some(_) => {}
            None => debug!(ops = %key, "Concurrent request no longer exists"),
        }
    }
    Ok(running)
}

/// Newest request in `running` whose declared effect is `replicas` on
/// `component`; empty when none matches
fn latest_matching_ops(running: &[OpsRequest], component: &str, replicas: u32) -> String {
    for ops in running {
        let matched = match ops.spec.ops_type {
            OpsType::HorizontalScaling => ops
                .spec
                .horizontal_scaling
                .iter()
                .any(|h| h.component_name == component && h.replicas == replicas),
            OpsType::Stop => replicas == 0,
            OpsType::Start => ops
                .component_replicas_snapshot()
                .map(|snapshot| snapshot.get(component) == Some(&replicas))
                .unwrap_or(false),
            _ => false,
        };
        if matched {
            return ops.name().to_string();
        }
    }
    String::new()
}

/// Record `override_by` on every component whose replicas differ from what
/// this request asked for
#[instrument(skip(store, res), fields(ops = %res.ops_request.key()))]
pub async fn sync_override_by_for_scale_replicas(
    store: &dyn ResourceStore,
    res: &mut OpsResource,
) -> Result<()> {
    let cluster = res.cluster()?;
    let running = running_ops_with_same_kind(store, cluster, &SCALE_REPLICAS_TYPES).await?;
    if running.is_empty() {
        return Ok(());
    }
    let current = cluster.component_replicas();

    let ops = &res.ops_request;
    let desired: BTreeMap<String, u32> = match ops.spec.ops_type {
        OpsType::HorizontalScaling => ops
            .spec
            .horizontal_scaling
            .iter()
            .map(|h| (h.component_name.clone(), h.replicas))
            .collect(),
        OpsType::Stop => ops.status.components.keys().map(|c| (c.clone(), 0)).collect(),
        OpsType::Start => {
            let snapshot = ops.component_replicas_snapshot()?;
            ops.status
                .components
                .keys()
                .filter_map(|c| snapshot.get(c).map(|r| (c.clone(), *r)))
                .collect()
        }
        _ => return Ok(()),
    };

    for (component, desired_replicas) in desired {
        let Some(&current_replicas) = current.get(&component) else {
            continue;
        };
        if desired_replicas == current_replicas {
            continue;
        }
        let ops_name = latest_matching_ops(&running, &component, current_replicas);
        debug!(
            %component,
            desired_replicas,
            current_replicas,
            override_by = %ops_name,
            "Component replicas superseded"
        );
        res.ops_request
            .status
            .components
            .entry(component)
            .or_default()
            .override_by = Some(OverrideBy {
            ops_name,
            last_component_configuration: LastComponentConfiguration {
                replicas: Some(current_replicas),
            },
        });
    }
    Ok(())
}
