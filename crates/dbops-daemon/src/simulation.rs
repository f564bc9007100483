//! Simulated operation handlers
//!
//! The daemon ships without real workload drivers. These handlers move the
//! cluster through the phases a real operation would, change replica counts
//! where the operation asks for it, and report success after a configurable
//! number of reconcile passes.
//!
//! Component phases observed on the cluster status are mirrored onto the
//! request once they settle. A component left failed or abnormal holds the
//! operation back until it recovers or the failure timeout runs out.

use crate::config::SimulationConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use dbops_engine::{
    ActionProgress, OpsBehaviour, OpsContext, OpsError, OpsHandler, OpsRegistry, OpsResource,
    Result,
};
use dbops_store::retry_on_conflict;
use dbops_types::{
    annotations, Cluster, ClusterPhase, ComponentPhase, ConfigurationItemStatus,
    LastComponentConfiguration, ObjectKey, OpsRequest, OpsType, ReconfigurePhase,
    ReconfiguringStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cluster phases most operations may start from
const RUNNING_PHASES: [ClusterPhase; 3] = [
    ClusterPhase::Running,
    ClusterPhase::Failed,
    ClusterPhase::Abnormal,
];

/// Build a registry with a simulated handler behind every operation type
pub fn simulated_registry(config: &SimulationConfig) -> Result<OpsRegistry> {
    let handler = Arc::new(SimulatedHandler::new(config));
    let updating = |phases: &[ClusterPhase]| {
        OpsBehaviour::new(handler.clone())
            .from_phases(phases)
            .to_phase(ClusterPhase::Updating)
    };

    let registry = OpsRegistry::builder()
        .register(OpsType::Upgrade, updating(&RUNNING_PHASES))?
        .register(OpsType::VerticalScaling, updating(&RUNNING_PHASES).cancellable())?
        .register(
            OpsType::HorizontalScaling,
            updating(&RUNNING_PHASES).cancellable(),
        )?
        .register(OpsType::Restart, updating(&RUNNING_PHASES))?
        .register(
            OpsType::Switchover,
            updating(&[
                ClusterPhase::Running,
                ClusterPhase::Updating,
                ClusterPhase::Abnormal,
            ]),
        )?
        .register(OpsType::Reconfiguring, updating(&RUNNING_PHASES))?
        .register(
            OpsType::Stop,
            OpsBehaviour::new(handler.clone())
                .from_phases(&[
                    ClusterPhase::Running,
                    ClusterPhase::Updating,
                    ClusterPhase::Failed,
                    ClusterPhase::Abnormal,
                ])
                .to_phase(ClusterPhase::Stopping),
        )?
        .register(
            OpsType::Start,
            updating(&[
                ClusterPhase::Stopped,
                ClusterPhase::Failed,
                ClusterPhase::Abnormal,
            ]),
        )?
        .register(OpsType::Custom, OpsBehaviour::new(handler.clone()))?
        .build();
    Ok(registry)
}

/// What the cluster reports about the components a request touches
#[derive(Debug, Clone, PartialEq, Eq)]
enum ComponentHealth {
    Healthy,
    /// A component is failed or abnormal but still inside the timeout
    Waiting,
    Failed(String),
}

/// Handler that pretends to carry out any operation type
pub struct SimulatedHandler {
    passes_until_done: u32,
    progress_interval: Duration,
    failed_timeout: Duration,
    passes: DashMap<String, u32>,
    /// (request uid, component) → first pass the component was seen failing
    failed_since: DashMap<(String, String), Instant>,
}

impl SimulatedHandler {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            passes_until_done: config.passes_until_done,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            failed_timeout: Duration::from_secs(config.component_failed_timeout_secs),
            passes: DashMap::new(),
            failed_since: DashMap::new(),
        }
    }

    fn next_pass(&self, ops: &OpsRequest) -> u32 {
        let mut entry = self.passes.entry(ops.metadata.uid.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn forget(&self, ops: &OpsRequest) {
        let uid = ops.metadata.uid.to_string();
        self.passes.remove(&uid);
        self.failed_since.retain(|(owner, _), _| *owner != uid);
    }

    /// Mirror settled component phases onto the request and check for
    /// components that stayed broken past the timeout
    fn component_health(&self, res: &mut OpsResource) -> ComponentHealth {
        let Some(cluster) = res.cluster.as_ref() else {
            return ComponentHealth::Healthy;
        };
        let uid = res.ops_request.metadata.uid.to_string();
        let mut health = ComponentHealth::Healthy;

        for name in res.ops_request.target_components() {
            let Some(observed) = cluster.status.components.get(&name) else {
                continue;
            };
            if observed.phase.is_completed() {
                let status = res
                    .ops_request
                    .status
                    .components
                    .entry(name.clone())
                    .or_default();
                status.phase = Some(observed.phase);
                status.message = observed.message.clone();
            }

            let key = (uid.clone(), name.clone());
            if !observed.phase.is_failed_or_abnormal() {
                self.failed_since.remove(&key);
                continue;
            }
            let since = *self.failed_since.entry(key).or_insert_with(Instant::now);
            if since.elapsed() >= self.failed_timeout {
                return ComponentHealth::Failed(format!(
                    "component {} stayed {} for more than {}s",
                    name,
                    observed.phase,
                    self.failed_timeout.as_secs()
                ));
            }
            health = ComponentHealth::Waiting;
        }
        health
    }

    /// Put the cluster back into a settled phase and report success
    async fn finish(&self, ctx: &OpsContext, res: &mut OpsResource) -> Result<ActionProgress> {
        self.forget(&res.ops_request);
        let ops_type = res.ops_request.spec.ops_type;
        let (cluster_phase, component_phase) = match ops_type {
            OpsType::Stop => (ClusterPhase::Stopped, ComponentPhase::Stopped),
            _ => (ClusterPhase::Running, ComponentPhase::Running),
        };

        if res.cluster.is_some() {
            let components: Vec<String> =
                res.ops_request.status.components.keys().cloned().collect();
            let cluster = update_cluster(ctx, &res.ops_request.cluster_key(), |cluster| {
                cluster.status.phase = cluster_phase;
                mark_components(cluster, components.iter().cloned(), component_phase);
                Ok(())
            })
            .await?;
            res.cluster = Some(cluster);
        }
        for status in res.ops_request.status.components.values_mut() {
            status.phase = Some(component_phase);
            status.message = None;
        }
        update_reconfiguring(&mut res.ops_request, |item| {
            item.status = ReconfigurePhase::Succeeded;
            item.succeed_count = item.expected_count;
            Ok(())
        })?;
        info!(ops = %res.ops_request.key(), %cluster_phase, "Simulated operation finished");
        Ok(ActionProgress::succeeded())
    }
}

#[async_trait]
impl OpsHandler for SimulatedHandler {
    async fn save_last_configuration(
        &self,
        _ctx: &OpsContext,
        res: &mut OpsResource,
    ) -> Result<()> {
        let Some(cluster) = res.cluster.as_ref() else {
            return Ok(());
        };
        let replicas = cluster.component_replicas();
        let targets = res.ops_request.target_components();
        let last = &mut res.ops_request.status.last_configuration.components;
        for component in targets {
            if let Some(current) = replicas.get(&component) {
                last.insert(
                    component,
                    LastComponentConfiguration {
                        replicas: Some(*current),
                    },
                );
            }
        }
        Ok(())
    }

    async fn action(&self, ctx: &OpsContext, res: &mut OpsResource) -> Result<()> {
        if res.cluster.is_none() {
            return Ok(());
        }
        let cluster_key = res.ops_request.cluster_key();
        let ops = &res.ops_request;

        let (cluster, components) = match ops.spec.ops_type {
            OpsType::HorizontalScaling => {
                let cluster = update_cluster(ctx, &cluster_key, |cluster| {
                    for scaling in &ops.spec.horizontal_scaling {
                        set_replicas(cluster, &scaling.component_name, scaling.replicas);
                    }
                    mark_components(cluster, ops.target_components(), ComponentPhase::Updating);
                    cluster.status.phase = ClusterPhase::Updating;
                    Ok(())
                })
                .await?;
                (cluster, component_phases(ops.target_components(), ComponentPhase::Updating))
            }
            OpsType::Stop => {
                let cluster = update_cluster(ctx, &cluster_key, |cluster| {
                    let snapshot = serde_json::to_string(&cluster.component_replicas())?;
                    cluster
                        .metadata
                        .set_annotation(annotations::COMPONENT_REPLICAS, snapshot);
                    for spec in cluster.spec.component_specs.iter_mut() {
                        spec.replicas = 0;
                    }
                    let components = cluster.component_replicas().into_keys();
                    mark_components(cluster, components, ComponentPhase::Stopping);
                    cluster.status.phase = ClusterPhase::Stopping;
                    Ok(())
                })
                .await?;
                let components = cluster.component_replicas().into_keys();
                (cluster, component_phases(components, ComponentPhase::Stopping))
            }
            OpsType::Start => {
                let cluster = update_cluster(ctx, &cluster_key, |cluster| {
                    let snapshot = cluster_snapshot(cluster)?;
                    for (component, replicas) in &snapshot {
                        set_replicas(cluster, component, *replicas);
                    }
                    mark_components(cluster, snapshot.into_keys(), ComponentPhase::Starting);
                    cluster
                        .metadata
                        .remove_annotation(annotations::COMPONENT_REPLICAS);
                    cluster.status.phase = ClusterPhase::Updating;
                    Ok(())
                })
                .await?;
                let snapshot = cluster.component_replicas();
                record_start_snapshot(ctx, &ops.key(), &snapshot).await?;
                (cluster, component_phases(snapshot.into_keys(), ComponentPhase::Starting))
            }
            OpsType::Custom => {
                let cluster = res.cluster()?.clone();
                (cluster, component_phases(ops.target_components(), ComponentPhase::Updating))
            }
            _ => {
                let cluster = update_cluster(ctx, &cluster_key, |cluster| {
                    mark_components(cluster, ops.target_components(), ComponentPhase::Updating);
                    cluster.status.phase = ClusterPhase::Updating;
                    Ok(())
                })
                .await?;
                (cluster, component_phases(ops.target_components(), ComponentPhase::Updating))
            }
        };

        debug!(
            ops = %res.ops_request.key(),
            cluster_phase = %cluster.phase(),
            "Simulated operation started"
        );
        if let Some(reconfigure) = res.ops_request.spec.reconfigure.as_ref() {
            // New configuration is written up front; instances pick it up over the passes
            let expected = cluster
                .component(&reconfigure.component_name)
                .map(|c| c.replicas as i32)
                .ok_or_else(|| {
                    OpsError::Internal(format!(
                        "component {} not found",
                        reconfigure.component_name
                    ))
                })?;
            update_reconfiguring(&mut res.ops_request, |item| {
                item.status = ReconfigurePhase::Persisted;
                item.expected_count = expected;
                item.succeed_count = 0;
                Ok(())
            })?;
        }
        res.cluster = Some(cluster);
        for (component, phase) in components {
            res.ops_request
                .status
                .components
                .entry(component)
                .or_default()
                .phase = Some(phase);
        }
        Ok(())
    }

    async fn reconcile_action(
        &self,
        ctx: &OpsContext,
        res: &mut OpsResource,
    ) -> Result<ActionProgress> {
        if res.ops_request.spec.cancel {
            return self.finish(ctx, res).await;
        }
        let pass = self.next_pass(&res.ops_request);
        match self.component_health(res) {
            ComponentHealth::Healthy => {}
            ComponentHealth::Waiting => {
                debug!(ops = %res.ops_request.key(), "Waiting for failed components to recover");
                return Ok(ActionProgress::running(self.progress_interval));
            }
            ComponentHealth::Failed(message) => {
                warn!(ops = %res.ops_request.key(), %message, "Simulated operation failed");
                self.forget(&res.ops_request);
                return Ok(ActionProgress::failed(message));
            }
        }
        if pass < self.passes_until_done {
            debug!(ops = %res.ops_request.key(), pass, "Simulated operation in progress");
            let passes = self.passes_until_done as i32;
            update_reconfiguring(&mut res.ops_request, |item| {
                item.succeed_count = item.expected_count * pass as i32 / passes;
                Ok(())
            })?;
            return Ok(ActionProgress::running(self.progress_interval));
        }
        self.finish(ctx, res).await
    }

    async fn cancel(&self, _ctx: &OpsContext, res: &mut OpsResource) -> Result<()> {
        info!(ops = %res.ops_request.key(), "Simulated operation cancelling");
        Ok(())
    }
}

fn set_replicas(cluster: &mut Cluster, component: &str, replicas: u32) {
    for spec in cluster.spec.component_specs.iter_mut() {
        if spec.name == component {
            spec.replicas = replicas;
        }
    }
}

fn mark_components(
    cluster: &mut Cluster,
    components: impl IntoIterator<Item = String>,
    phase: ComponentPhase,
) {
    for name in components {
        let status = cluster.status.components.entry(name).or_default();
        status.phase = phase;
        status.message = None;
    }
}

/// Apply `update` to the progress entry of every template the request changes
fn update_reconfiguring<F>(ops: &mut OpsRequest, update: F) -> Result<()>
where
    F: Fn(&mut ConfigurationItemStatus) -> Result<()>,
{
    let Some(reconfigure) = ops.spec.reconfigure.as_ref() else {
        return Ok(());
    };
    let status = ops
        .status
        .reconfiguring_status
        .get_or_insert_with(ReconfiguringStatus::default);
    for item in &reconfigure.configurations {
        status.update_by_template(&item.name, &update)?;
    }
    Ok(())
}

fn cluster_snapshot(cluster: &Cluster) -> Result<BTreeMap<String, u32>> {
    match cluster.metadata.annotation(annotations::COMPONENT_REPLICAS) {
        None | Some("") => Ok(BTreeMap::new()),
        Some(raw) => Ok(serde_json::from_str(raw)?),
    }
}

fn component_phases(
    components: impl IntoIterator<Item = String>,
    phase: ComponentPhase,
) -> Vec<(String, ComponentPhase)> {
    components.into_iter().map(|c| (c, phase)).collect()
}

/// Re-read, mutate and write the cluster until the write lands
async fn update_cluster<F>(ctx: &OpsContext, key: &ObjectKey, mutate: F) -> Result<Cluster>
where
    F: Fn(&mut Cluster) -> Result<()> + Send + Sync,
{
    let store = &ctx.store;
    let mutate = &mutate;
    retry_on_conflict(&ctx.conflict_retry, move || async move {
        let mut cluster = store
            .get_cluster(key)
            .await?
            .ok_or_else(|| OpsError::Internal(format!("cluster {} not found", key)))?;
        mutate(&mut cluster)?;
        Ok::<_, OpsError>(store.update_cluster(&cluster).await?)
    })
    .await
}

/// Keep the replicas a Start restored on the request itself
async fn record_start_snapshot(
    ctx: &OpsContext,
    key: &ObjectKey,
    snapshot: &BTreeMap<String, u32>,
) -> Result<()> {
    let store = &ctx.store;
    retry_on_conflict(&ctx.conflict_retry, move || async move {
        let Some(mut ops) = store.get_ops_request(key).await? else {
            return Ok(());
        };
        ops.set_component_replicas_snapshot(snapshot)?;
        store.update_ops_request(&ops).await?;
        Ok::<_, OpsError>(())
    })
    .await
}
