//! Request lifecycle driver
//!
//! [`OpsManager::process`] is a step function. Each call reads the request
//! and its cluster from the store, advances the request by at most one
//! phase, persists the result and tells the caller when to call again. No
//! state is held between calls, so any number of callers may drive the same
//! request and a restarted process resumes where the store left off.
//!
//! ```text
//! Pending ──► Creating ──► Running ──► Succeeded | Failed
//!    │                        │
//!    └──► Cancelled ◄── Cancelling
//! ```

use crate::admission::{check_cluster_phase, validate_request};
use crate::config::EngineConfig;
use crate::definition::OpsDefinitionResolver;
use crate::dependency::{resolve_dependencies, DependencyResolution};
use crate::error::{ErrorKind, OpsError, Result};
use crate::events::EventRecorder;
use crate::handler::{OpsContext, OpsResource};
use crate::override_by::sync_override_by_for_scale_replicas;
use crate::queue::{OpsQueue, QueueAdmission};
use crate::registry::{OpsBehaviour, OpsRegistry};
use dbops_store::{retry_on_conflict, ResourceStore};
use dbops_types::{
    reason, set_condition, Condition, ObjectKey, OpsPhase, OpsRequest, OpsRequestStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What the caller should do after one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The request is terminal or gone; stop driving it
    Done,
    /// Nothing to do until something else changes
    Idle,
    /// Call again after the delay
    RequeueAfter(Duration),
}

impl Step {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

enum PatchOutcome {
    Written {
        stored: OpsRequest,
        before: OpsRequestStatus,
    },
    Gone,
    Moved(OpsPhase),
}

/// Drives operations requests through their lifecycle
pub struct OpsManager {
    store: Arc<dyn ResourceStore>,
    registry: Arc<OpsRegistry>,
    queue: OpsQueue,
    events: EventRecorder,
    resolver: Option<Arc<dyn OpsDefinitionResolver>>,
    config: EngineConfig,
}

impl OpsManager {
    pub fn new(store: Arc<dyn ResourceStore>, registry: Arc<OpsRegistry>, config: EngineConfig) -> Self {
        let queue = OpsQueue::new(store.clone(), config.queue_limit, config.conflict_retry.clone());
        Self {
            store,
            registry,
            queue,
            events: EventRecorder::new(),
            resolver: None,
            config,
        }
    }

    /// Enable custom operations backed by `resolver`
    pub fn with_definition_resolver(mut self, resolver: Arc<dyn OpsDefinitionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_event_recorder(mut self, events: EventRecorder) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventRecorder {
        &self.events
    }

    pub fn registry(&self) -> &OpsRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &OpsQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(&self) -> OpsContext {
        OpsContext {
            store: self.store.clone(),
            conflict_retry: self.config.conflict_retry.clone(),
        }
    }

    /// Advance the request stored under `key` by one step
    #[instrument(skip(self), fields(ops = %key))]
    pub async fn process(&self, key: &ObjectKey) -> Result<Step> {
        let Some(ops) = self.store.get_ops_request(key).await? else {
            debug!("OpsRequest not found, nothing to do");
            return Ok(Step::Done);
        };
        if ops.is_complete() {
            self.ensure_dequeued(&ops).await?;
            return Ok(Step::Done);
        }

        let cluster = self.store.get_cluster(&ops.cluster_key()).await?;
        let mut res = OpsResource::new(ops, cluster);

        let Some(behaviour) = self.registry.lookup(res.ops_request.spec.ops_type) else {
            self.fail_not_supported(&mut res).await?;
            return Ok(Step::Done);
        };
        if res.cluster.is_none() && !behaviour.is_cluster_creation {
            let condition = Condition::cluster_not_found(&res.ops_request.spec.cluster_name);
            self.transition(&mut res, OpsPhase::Failed, vec![condition]).await?;
            return Ok(Step::Done);
        }

        match res.ops_request.phase() {
            OpsPhase::Pending => self.admit(&mut res).await,
            OpsPhase::Creating => self.start(&mut res).await,
            OpsPhase::Running | OpsPhase::Cancelling => self.reconcile(&mut res).await,
            OpsPhase::Succeeded | OpsPhase::Failed | OpsPhase::Cancelled => Ok(Step::Done),
        }
    }

    /// Look up the behaviour, failing the request when there is none
    async fn behaviour_for(&self, res: &mut OpsResource) -> Result<Option<&OpsBehaviour>> {
        match self.registry.lookup(res.ops_request.spec.ops_type) {
            Some(behaviour) => Ok(Some(behaviour)),
            None => {
                self.fail_not_supported(res).await?;
                Ok(None)
            }
        }
    }

    /// Gate a pending request and move it to Creating once every check passes
    #[instrument(skip(self, res), fields(ops = %res.ops_request.key()))]
    pub async fn admit(&self, res: &mut OpsResource) -> Result<Step> {
        expect_phase(&res.ops_request, &[OpsPhase::Pending])?;
        let Some(behaviour) = self.behaviour_for(res).await? else {
            return Ok(Step::Done);
        };
        let name = res.ops_request.name().to_string();

        if res.ops_request.spec.cancel {
            self.transition(res, OpsPhase::Cancelled, vec![Condition::cancelled(&name, None)])
                .await?;
            return Ok(Step::Done);
        }

        let resolver = self.resolver.as_deref();
        let validated =
            validate_request(&res.ops_request, res.cluster.as_ref(), behaviour, resolver).await;
        if let Err(e) = validated {
            if e.kind() != ErrorKind::Fatal {
                return Err(e);
            }
            warn!(error = %e, "OpsRequest rejected");
            let condition = Condition::validate_failed(reason::VALIDATE_FAILED, e.to_string());
            self.transition(res, OpsPhase::Failed, vec![condition]).await?;
            return Ok(Step::Done);
        }

        let now = chrono::Utc::now();
        if let Err(e) = check_cluster_phase(&res.ops_request, res.cluster.as_ref(), behaviour, now) {
            if e.kind() != ErrorKind::NeedWaiting {
                return Err(e);
            }
            debug!(reason = %e, "Waiting for cluster phase");
            return Ok(Step::RequeueAfter(self.config.wait_phase_requeue()));
        }

        if let (Some(target_phase), true) = (behaviour.to_cluster_phase, res.cluster.is_some()) {
            let admission = self.queue.enqueue(&res.ops_request, target_phase).await;
            match admission {
                Ok(QueueAdmission::Proceed) => {}
                Ok(QueueAdmission::Wait { ahead }) => {
                    debug!(ahead, "Waiting in the admission queue");
                    return Ok(Step::Idle);
                }
                Err(e) if e.kind() == ErrorKind::Fatal => {
                    warn!(error = %e, "Admission queue rejected OpsRequest");
                    self.transition(res, OpsPhase::Failed, vec![fatal_condition(&name, &e)])
                        .await?;
                    return Ok(Step::Done);
                }
                Err(e) => return Err(e),
            }
        }

        let retry = &self.config.conflict_retry;
        let resolution = resolve_dependencies(self.store.as_ref(), retry, &res.ops_request).await;
        match resolution {
            Ok(DependencyResolution::Ready) => {}
            Ok(DependencyResolution::NotReady { .. }) => return Ok(Step::Idle),
            Ok(DependencyResolution::Cancel { dependency, phase }) => {
                let detail = format!("dependent OpsRequest {} is {}", dependency, phase);
                let condition = Condition::cancelled(&name, Some(&detail));
                self.transition(res, OpsPhase::Cancelled, vec![condition]).await?;
                return Ok(Step::Done);
            }
            Err(e) if e.kind() == ErrorKind::Fatal => {
                warn!(error = %e, "Dependency resolution failed");
                self.transition(res, OpsPhase::Failed, vec![fatal_condition(&name, &e)])
                    .await?;
                return Ok(Step::Done);
            }
            Err(e) => return Err(e),
        }

        let ctx = self.context();
        behaviour.handler.save_last_configuration(&ctx, res).await?;
        let mut conditions = vec![Condition::validate_passed(&name)];
        conditions.extend(behaviour.handler.action_started_condition(&res.ops_request)?);
        self.transition(res, OpsPhase::Creating, conditions).await?;
        Ok(Step::RequeueAfter(Duration::ZERO))
    }

    /// Run the handler's first action and move the request to Running
    #[instrument(skip(self, res), fields(ops = %res.ops_request.key()))]
    pub async fn start(&self, res: &mut OpsResource) -> Result<Step> {
        expect_phase(&res.ops_request, &[OpsPhase::Creating])?;
        let Some(behaviour) = self.behaviour_for(res).await? else {
            return Ok(Step::Done);
        };

        let ctx = self.context();
        let acted = behaviour.handler.action(&ctx, res).await;
        if let Err(e) = acted {
            return match e.kind() {
                ErrorKind::Fatal => {
                    warn!(error = %e, "Action failed fatally");
                    let condition = Condition::failed(res.ops_request.name(), Some(&e.to_string()));
                    self.transition(res, OpsPhase::Failed, vec![condition]).await?;
                    Ok(Step::Done)
                }
                ErrorKind::NeedWaiting => {
                    debug!(reason = %e, "Action needs waiting");
                    Ok(Step::Idle)
                }
                ErrorKind::Retryable => Err(e),
            };
        }

        self.transition(res, OpsPhase::Running, Vec::new()).await?;
        Ok(Step::RequeueAfter(Duration::ZERO))
    }

    /// Poll the handler of a running or cancelling request
    #[instrument(skip(self, res), fields(ops = %res.ops_request.key()))]
    pub async fn reconcile(&self, res: &mut OpsResource) -> Result<Step> {
        expect_phase(&res.ops_request, &[OpsPhase::Running, OpsPhase::Cancelling])?;
        let Some(behaviour) = self.behaviour_for(res).await? else {
            return Ok(Step::Done);
        };
        let ctx = self.context();

        if res.ops_request.spec.cancel && res.ops_request.phase() == OpsPhase::Running {
            if behaviour.cancel_supported {
                behaviour.handler.cancel(&ctx, res).await?;
                let condition = Condition::cancelling(res.ops_request.name());
                self.transition(res, OpsPhase::Cancelling, vec![condition]).await?;
                return Ok(Step::RequeueAfter(Duration::ZERO));
            }
            warn!(
                ops_type = %res.ops_request.spec.ops_type,
                "Cancel requested but not supported for this type, ignoring"
            );
        }

        let stored_status = res.ops_request.status.clone();
        if res.ops_request.spec.ops_type.scales_replicas() && res.cluster.is_some() {
            sync_override_by_for_scale_replicas(self.store.as_ref(), res).await?;
        }

        let progress = match behaviour.handler.reconcile_action(&ctx, res).await {
            Ok(progress) => progress,
            Err(e) => {
                return match e.kind() {
                    ErrorKind::Fatal => {
                        warn!(error = %e, "Reconcile failed fatally");
                        self.handle_completed(res, OpsPhase::Failed, Some(e.to_string()))
                            .await?;
                        Ok(Step::Done)
                    }
                    ErrorKind::NeedWaiting => {
                        debug!(reason = %e, "Reconcile needs waiting");
                        Ok(Step::Idle)
                    }
                    ErrorKind::Retryable => Err(e),
                };
            }
        };

        match progress.phase {
            OpsPhase::Succeeded | OpsPhase::Failed => {
                self.handle_completed(res, progress.phase, progress.message).await?;
                Ok(Step::Done)
            }
            _ => {
                if res.ops_request.status != stored_status {
                    let phase = res.ops_request.phase();
                    self.patch_status(res, phase, Vec::new()).await?;
                }
                Ok(Step::RequeueAfter(progress.requeue_after))
            }
        }
    }

    /// Finalize a request whose handler reported a terminal phase
    ///
    /// A request that was being cancelled always ends Cancelled; the
    /// condition tells whether the abort itself went through.
    async fn handle_completed(
        &self,
        res: &mut OpsResource,
        phase: OpsPhase,
        cause: Option<String>,
    ) -> Result<()> {
        let name = res.ops_request.name().to_string();
        let cause = cause.as_deref();
        let (phase, condition) = match (res.ops_request.phase(), phase) {
            (OpsPhase::Cancelling, OpsPhase::Succeeded) => {
                (OpsPhase::Cancelled, Condition::cancel_succeeded(&name))
            }
            (OpsPhase::Cancelling, _) => (OpsPhase::Cancelled, Condition::cancel_failed(&name, cause)),
            (_, OpsPhase::Succeeded) => (OpsPhase::Succeeded, Condition::succeeded(&name)),
            (_, _) => (OpsPhase::Failed, Condition::failed(&name, cause)),
        };
        self.transition(res, phase, vec![condition]).await
    }

    async fn fail_not_supported(&self, res: &mut OpsResource) -> Result<()> {
        warn!(ops_type = %res.ops_request.spec.ops_type, "OpsRequest type not supported");
        let condition = Condition::not_supported(res.ops_request.spec.ops_type);
        self.transition(res, OpsPhase::Failed, vec![condition]).await
    }

    /// Persist a phase change; a terminal phase also releases the queue entry
    async fn transition(
        &self,
        res: &mut OpsResource,
        to: OpsPhase,
        conditions: Vec<Condition>,
    ) -> Result<()> {
        let from = res.ops_request.phase();
        if !self.patch_status(res, to, conditions).await? {
            return Ok(());
        }
        info!(ops = %res.ops_request.key(), %from, %to, "OpsRequest phase changed");
        if to.is_terminal() {
            self.ensure_dequeued(&res.ops_request).await?;
        }
        Ok(())
    }

    /// Write `res`'s status with `to` and `conditions` applied
    ///
    /// Compare-and-swap against the stored request: the write only happens
    /// while the stored phase still equals the in-memory one. Returns false
    /// when the request was deleted or moved on concurrently. Events are
    /// emitted after the write succeeds.
    async fn patch_status(
        &self,
        res: &mut OpsResource,
        to: OpsPhase,
        conditions: Vec<Condition>,
    ) -> Result<bool> {
        let from = res.ops_request.phase();
        if !from.can_transition_to(to) {
            return Err(OpsError::Internal(format!(
                "illegal phase transition from {} to {}",
                from, to
            )));
        }

        let now = chrono::Utc::now();
        let mut status = res.ops_request.status.clone();
        for condition in conditions {
            set_condition(&mut status.conditions, condition);
        }
        status.phase = to;
        match to {
            OpsPhase::Creating => {
                status.start_timestamp.get_or_insert(now);
            }
            OpsPhase::Cancelling | OpsPhase::Cancelled => {
                status.cancel_timestamp.get_or_insert(now);
            }
            _ => {}
        }
        if to.is_terminal() {
            status.completion_timestamp = Some(now);
        }

        let store = &self.store;
        let key = res.ops_request.key();
        let key = &key;
        let status = &status;
        let outcome = retry_on_conflict(&self.config.conflict_retry, move || async move {
            let Some(mut latest) = store.get_ops_request(key).await? else {
                return Ok(PatchOutcome::Gone);
            };
            if latest.phase() != from {
                return Ok(PatchOutcome::Moved(latest.phase()));
            }
            let before = std::mem::replace(&mut latest.status, status.clone());
            let stored = store.update_ops_request_status(&latest).await?;
            Ok::<_, OpsError>(PatchOutcome::Written { stored, before })
        })
        .await?;

        match outcome {
            PatchOutcome::Written { stored, before } => {
                self.events.record_status_change(&stored, &before);
                res.ops_request = stored;
                Ok(true)
            }
            PatchOutcome::Gone => {
                debug!("OpsRequest deleted, status not written");
                Ok(false)
            }
            PatchOutcome::Moved(actual) => {
                debug!(expected = %from, %actual, "OpsRequest phase changed concurrently, skipping write");
                Ok(false)
            }
        }
    }

    /// Release the admission queue entry of a terminal request
    ///
    /// Safe to call on every pass: nothing is written, and no event is
    /// emitted, once the entry is gone.
    pub async fn ensure_dequeued(&self, ops: &OpsRequest) -> Result<bool> {
        let queued = self
            .registry
            .lookup(ops.spec.ops_type)
            .map_or(false, |b| b.to_cluster_phase.is_some());
        if !queued {
            return Ok(false);
        }
        let cluster_key = ops.cluster_key();
        let removed = self.queue.dequeue(&cluster_key, ops.name()).await?;
        if removed {
            info!(ops = %ops.key(), cluster = %cluster_key, "Released admission queue entry");
            self.events.record_dequeued(ops, cluster_key);
        }
        Ok(removed)
    }

    /// Keys of every stored request, oldest first
    pub async fn list_keys(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>> {
        Ok(self
            .store
            .list_ops_requests(namespace)
            .await?
            .iter()
            .map(OpsRequest::key)
            .collect())
    }
}

fn expect_phase(ops: &OpsRequest, allowed: &[OpsPhase]) -> Result<()> {
    if allowed.contains(&ops.phase()) {
        return Ok(());
    }
    Err(OpsError::Internal(format!(
        "OpsRequest {} is in phase {}, expected one of {:?}",
        ops.name(),
        ops.phase(),
        allowed
    )))
}

fn fatal_condition(name: &str, e: &OpsError) -> Condition {
    match e {
        OpsError::Fatal { reason, message } => Condition::fatal(reason, message.clone()),
        other => Condition::failed(name, Some(&other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{MockFailure, MockOpsHandler};
    use dbops_store::{ClusterStore, InMemoryResourceStore, OpsRequestStore};
    use dbops_types::{Cluster, ClusterPhase, ConditionType, OpsType};

    struct Fixture {
        store: Arc<InMemoryResourceStore>,
        manager: OpsManager,
        handler: Arc<MockOpsHandler>,
    }

    async fn fixture(handler: MockOpsHandler) -> Fixture {
        let store = Arc::new(InMemoryResourceStore::new());
        store
            .create_cluster(
                Cluster::new("default", "pg")
                    .with_component("postgresql", 3)
                    .with_phase(ClusterPhase::Running),
            )
            .await
            .unwrap();
        let handler = Arc::new(handler);
        let registry = OpsRegistry::builder()
            .register(
                OpsType::Restart,
                OpsBehaviour::new(handler.clone())
                    .from_phases(&[ClusterPhase::Running])
                    .to_phase(ClusterPhase::Updating)
                    .cancellable(),
            )
            .unwrap()
            .build();
        let manager = OpsManager::new(store.clone(), Arc::new(registry), EngineConfig::default());
        Fixture {
            store,
            manager,
            handler,
        }
    }

    async fn submit(store: &InMemoryResourceStore, ops: OpsRequest) -> ObjectKey {
        store.create_ops_request(ops).await.unwrap().key()
    }

    async fn get(store: &InMemoryResourceStore, key: &ObjectKey) -> OpsRequest {
        store.get_ops_request(key).await.unwrap().unwrap()
    }

    fn restart(name: &str) -> OpsRequest {
        OpsRequest::new("default", name, "pg", OpsType::Restart).with_restart("postgresql")
    }

    #[tokio::test]
    async fn test_happy_path_reaches_succeeded() {
        let f = fixture(MockOpsHandler::succeeding_after(2)).await;
        let key = submit(&f.store, restart("r1")).await;

        assert_eq!(f.manager.process(&key).await.unwrap(), Step::RequeueAfter(Duration::ZERO));
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Creating);
        assert!(ops.status.start_timestamp.is_some());
        assert_eq!(
            ops.status.last_configuration.components["postgresql"].replicas,
            Some(3)
        );

        f.manager.process(&key).await.unwrap();
        assert_eq!(get(&f.store, &key).await.phase(), OpsPhase::Running);

        assert!(matches!(f.manager.process(&key).await.unwrap(), Step::RequeueAfter(_)));
        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);

        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Succeeded);
        assert!(ops.status.completion_timestamp.is_some());
        let cluster = f.store.get_cluster(&ops.cluster_key()).await.unwrap().unwrap();
        assert!(cluster.ops_queue().unwrap().is_empty());
        assert_eq!(f.handler.save_calls(), 1);
        assert_eq!(f.handler.action_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let mut ops = restart("r1");
        ops.spec.cancel = true;
        let key = submit(&f.store, ops).await;

        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Cancelled);
        assert_eq!(ops.status.conditions[0].reason, reason::CANCELLED);
        assert_eq!(f.handler.save_calls(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let key = submit(
            &f.store,
            OpsRequest::new("default", "r1", "pg", OpsType::Restart).with_restart("mysql"),
        )
        .await;

        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Failed);
        assert_eq!(ops.status.conditions[0].condition_type, ConditionType::Validated);
        assert_eq!(ops.status.conditions[0].reason, reason::VALIDATE_FAILED);
    }

    #[tokio::test]
    async fn test_unregistered_type_fails_not_supported() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let key = submit(&f.store, OpsRequest::new("default", "u1", "pg", OpsType::Upgrade)).await;

        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Failed);
        assert_eq!(ops.status.conditions[0].reason, reason::OPS_TYPE_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_missing_cluster_fails() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let key = submit(
            &f.store,
            OpsRequest::new("default", "r1", "ghost", OpsType::Restart).with_restart("postgresql"),
        )
        .await;

        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Failed);
        assert_eq!(ops.status.conditions[0].reason, reason::CLUSTER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fatal_action_fails_request() {
        let f = fixture(MockOpsHandler::succeeding_after(1).with_action_failure(MockFailure::Fatal)).await;
        let key = submit(&f.store, restart("r1")).await;

        f.manager.process(&key).await.unwrap();
        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Failed);
        assert!(ops
            .status
            .conditions
            .iter()
            .any(|c| c.condition_type == ConditionType::Failed));
    }

    #[tokio::test]
    async fn test_waiting_action_keeps_creating() {
        let f = fixture(
            MockOpsHandler::succeeding_after(1).with_action_failure(MockFailure::NeedWaiting),
        )
        .await;
        let key = submit(&f.store, restart("r1")).await;

        f.manager.process(&key).await.unwrap();
        let version = get(&f.store, &key).await.metadata.resource_version;
        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Idle);
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Creating);
        assert_eq!(ops.metadata.resource_version, version);
    }

    #[tokio::test]
    async fn test_retryable_reconcile_error_bubbles_without_change() {
        let f = fixture(
            MockOpsHandler::succeeding_after(1).with_reconcile_failure(MockFailure::Retryable),
        )
        .await;
        let key = submit(&f.store, restart("r1")).await;
        f.manager.process(&key).await.unwrap();
        f.manager.process(&key).await.unwrap();

        let err = f.manager.process(&key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(get(&f.store, &key).await.phase(), OpsPhase::Running);
    }

    #[tokio::test]
    async fn test_handler_failure_ends_failed() {
        let f = fixture(MockOpsHandler::failing_after(1, "pods crashlooping")).await;
        let key = submit(&f.store, restart("r1")).await;
        for _ in 0..3 {
            f.manager.process(&key).await.unwrap();
        }

        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Failed);
        let failed = ops
            .status
            .conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Failed)
            .unwrap();
        assert!(failed.message.contains("pods crashlooping"));
    }

    #[tokio::test]
    async fn test_cooperative_cancel_of_running_request() {
        let f = fixture(MockOpsHandler::succeeding_after(3)).await;
        let key = submit(&f.store, restart("r1")).await;
        f.manager.process(&key).await.unwrap();
        f.manager.process(&key).await.unwrap();

        let mut ops = get(&f.store, &key).await;
        ops.spec.cancel = true;
        f.store.update_ops_request(&ops).await.unwrap();

        f.manager.process(&key).await.unwrap();
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Cancelling);
        assert!(ops.status.cancel_timestamp.is_some());
        assert_eq!(f.handler.cancel_calls(), 1);

        while !f.manager.process(&key).await.unwrap().is_done() {}
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Cancelled);
        let cancelled = ops
            .status
            .conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Cancelled)
            .unwrap();
        assert_eq!(cancelled.reason, reason::CANCEL_SUCCEEDED);
    }

    #[tokio::test]
    async fn test_cancel_ends_cancelled_when_handler_fails() {
        let f = fixture(MockOpsHandler::failing_after(3, "boom")).await;
        let key = submit(&f.store, restart("r1")).await;
        f.manager.process(&key).await.unwrap();
        f.manager.process(&key).await.unwrap();

        let mut ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Running);
        ops.spec.cancel = true;
        f.store.update_ops_request(&ops).await.unwrap();

        for _ in 0..6 {
            if f.manager.process(&key).await.unwrap().is_done() {
                break;
            }
        }
        let ops = get(&f.store, &key).await;
        assert_eq!(ops.phase(), OpsPhase::Cancelled);
        let cancelled = ops
            .status
            .conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Cancelled)
            .unwrap();
        assert_eq!(cancelled.reason, reason::CANCEL_FAILED);
        assert!(ops
            .status
            .conditions
            .iter()
            .all(|c| c.condition_type != ConditionType::Failed));
        let cluster = f.store.get_cluster(&ops.cluster_key()).await.unwrap().unwrap();
        assert!(cluster.ops_queue().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_request_is_only_dequeued() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let key = submit(&f.store, restart("r1")).await;
        while !f.manager.process(&key).await.unwrap().is_done() {}

        let mut rx = f.manager.events().subscribe();
        let version = get(&f.store, &key).await.metadata.resource_version;
        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
        assert_eq!(get(&f.store, &key).await.metadata.resource_version, version);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deleted_request_is_done() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let key = ObjectKey::new("default", "never-created");
        assert_eq!(f.manager.process(&key).await.unwrap(), Step::Done);
    }

    #[tokio::test]
    async fn test_request_deleted_mid_flight() {
        let f = fixture(MockOpsHandler::succeeding_after(5)).await;
        let first = submit(&f.store, restart("r1")).await;
        f.manager.process(&first).await.unwrap();
        f.manager.process(&first).await.unwrap();
        assert_eq!(get(&f.store, &first).await.phase(), OpsPhase::Running);

        f.store.delete_ops_request(&first).await.unwrap();
        assert_eq!(f.manager.process(&first).await.unwrap(), Step::Done);

        // The orphaned queue entry does not hold back the next request
        let second = submit(&f.store, restart("r2")).await;
        f.manager.process(&second).await.unwrap();
        assert_eq!(get(&f.store, &second).await.phase(), OpsPhase::Creating);
    }

    #[tokio::test]
    async fn test_admit_rejects_wrong_phase() {
        let f = fixture(MockOpsHandler::succeeding_after(1)).await;
        let mut ops = restart("r1");
        ops.status.phase = OpsPhase::Running;
        let mut res = OpsResource::new(ops, None);
        assert!(matches!(
            f.manager.admit(&mut res).await,
            Err(OpsError::Internal(_))
        ));
    }
}
