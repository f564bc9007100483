//! Pluggable per-type handler contract
//!
//! The engine decides *when* a request moves; handlers decide *what* an
//! operation does to the cluster. A handler never writes the request's
//! phase itself: it mutates the in-memory [`OpsResource`] and the engine
//! persists the result together with the next transition.

use crate::error::{OpsError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dbops_store::{BackoffConfig, ResourceStore};
use dbops_types::{
    Cluster, Condition, ConditionType, LastComponentConfiguration, OpsPhase, OpsRequest,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a component may stay failed before handlers give up on it
pub const COMPONENT_FAILED_TIMEOUT: Duration = Duration::from_secs(30);

/// A request together with the cluster it targets
#[derive(Debug, Clone)]
pub struct OpsResource {
    pub ops_request: OpsRequest,
    /// `None` only for cluster-creation operations
    pub cluster: Option<Cluster>,
}

impl OpsResource {
    pub fn new(ops_request: OpsRequest, cluster: Option<Cluster>) -> Self {
        Self {
            ops_request,
            cluster,
        }
    }

    /// The target cluster; an error for operations that need one
    pub fn cluster(&self) -> Result<&Cluster> {
        self.cluster.as_ref().ok_or_else(|| {
            OpsError::Internal(format!(
                "cluster {} is not loaded",
                self.ops_request.spec.cluster_name
            ))
        })
    }
}

/// Shared dependencies handed to handlers
#[derive(Clone)]
pub struct OpsContext {
    pub store: Arc<dyn ResourceStore>,
    pub conflict_retry: BackoffConfig,
}

/// Result of one reconcile pass
#[derive(Debug, Clone, PartialEq)]
pub struct ActionProgress {
    /// Running to keep polling; Succeeded or Failed to finish
    pub phase: OpsPhase,

    /// Suggested delay before the next pass
    pub requeue_after: Duration,

    /// Failure detail, recorded on the terminal condition
    pub message: Option<String>,
}

impl ActionProgress {
    pub fn running(requeue_after: Duration) -> Self {
        Self {
            phase: OpsPhase::Running,
            requeue_after,
            message: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            phase: OpsPhase::Succeeded,
            requeue_after: Duration::ZERO,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: OpsPhase::Failed,
            requeue_after: Duration::ZERO,
            message: Some(message.into()),
        }
    }
}

/// Per-type operation logic
#[async_trait]
pub trait OpsHandler: Send + Sync {
    /// Record the component configuration the operation is about to change
    ///
    /// Writes into `res.ops_request.status.last_configuration`; the engine
    /// persists it with the transition to Creating.
    async fn save_last_configuration(&self, ctx: &OpsContext, res: &mut OpsResource)
        -> Result<()>;

    /// First side effects, run once when the request leaves Creating
    ///
    /// Return [`OpsError::NeedWaiting`] to be called again later and a
    /// fatal error to fail the request.
    async fn action(&self, ctx: &OpsContext, res: &mut OpsResource) -> Result<()>;

    /// Poll progress while Running or Cancelling
    ///
    /// Status changes made to `res.ops_request.status` are persisted. A
    /// terminal handler failure is reported as [`ActionProgress::failed`];
    /// an `Err` leaves the phase unchanged and is retried, unless it is
    /// classified fatal.
    async fn reconcile_action(
        &self,
        ctx: &OpsContext,
        res: &mut OpsResource,
    ) -> Result<ActionProgress>;

    /// Extra condition recorded on the transition into Creating
    fn action_started_condition(&self, _ops: &OpsRequest) -> Result<Option<Condition>> {
        Ok(None)
    }

    /// Begin a cooperative abort of a running request
    async fn cancel(&self, _ctx: &OpsContext, res: &mut OpsResource) -> Result<()> {
        Err(OpsError::Handler(format!(
            "cancel is not implemented for {}",
            res.ops_request.spec.ops_type
        )))
    }
}

/// Error a [`MockOpsHandler`] step can be told to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Fatal,
    NeedWaiting,
    Retryable,
}

impl MockFailure {
    fn to_error(self, step: &str) -> OpsError {
        match self {
            Self::Fatal => OpsError::fatal(
                dbops_types::reason::FATAL_FAILED,
                format!("simulated fatal error in {}", step),
            ),
            Self::NeedWaiting => OpsError::NeedWaiting(format!("simulated wait in {}", step)),
            Self::Retryable => OpsError::Handler(format!("simulated error in {}", step)),
        }
    }
}

/// Scripted handler for testing
///
/// Finishes each request after a fixed number of reconcile passes and
/// counts every call it receives.
pub struct MockOpsHandler {
    passes_until_done: u32,
    fail_with: Option<String>,
    action_failure: Option<MockFailure>,
    reconcile_failure: Option<MockFailure>,
    passes: DashMap<String, u32>,
    save_calls: AtomicU32,
    action_calls: AtomicU32,
    reconcile_calls: AtomicU32,
    cancel_calls: AtomicU32,
}

impl MockOpsHandler {
    /// Succeeds on reconcile pass number `passes`
    pub fn succeeding_after(passes: u32) -> Self {
        Self {
            passes_until_done: passes,
            fail_with: None,
            action_failure: None,
            reconcile_failure: None,
            passes: DashMap::new(),
            save_calls: AtomicU32::new(0),
            action_calls: AtomicU32::new(0),
            reconcile_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
        }
    }

    /// Reports Failed on reconcile pass number `passes`
    pub fn failing_after(passes: u32, message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::succeeding_after(passes)
        }
    }

    pub fn with_action_failure(mut self, failure: MockFailure) -> Self {
        self.action_failure = Some(failure);
        self
    }

    pub fn with_reconcile_failure(mut self, failure: MockFailure) -> Self {
        self.reconcile_failure = Some(failure);
        self
    }

    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn action_calls(&self) -> u32 {
        self.action_calls.load(Ordering::SeqCst)
    }

    pub fn reconcile_calls(&self) -> u32 {
        self.reconcile_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpsHandler for MockOpsHandler {
    async fn save_last_configuration(&self, _ctx: &OpsContext, res: &mut OpsResource) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        let Some(cluster) = res.cluster.as_ref() else {
            return Ok(());
        };
        for name in res.ops_request.target_components() {
            let replicas = cluster.component(&name).map(|c| c.replicas);
            res.ops_request
                .status
                .last_configuration
                .components
                .insert(name, LastComponentConfiguration { replicas });
        }
        Ok(())
    }

    async fn action(&self, _ctx: &OpsContext, _res: &mut OpsResource) -> Result<()> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        match self.action_failure {
            Some(failure) => Err(failure.to_error("action")),
            None => Ok(()),
        }
    }

    async fn reconcile_action(
        &self,
        _ctx: &OpsContext,
        res: &mut OpsResource,
    ) -> Result<ActionProgress> {
        self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.reconcile_failure {
            return Err(failure.to_error("reconcile"));
        }

        let pass = {
            let mut entry = self
                .passes
                .entry(res.ops_request.name().to_string())
                .or_insert(0);
            *entry += 1;
            *entry
        };
        if pass < self.passes_until_done {
            return Ok(ActionProgress::running(Duration::from_millis(100)));
        }
        Ok(match &self.fail_with {
            Some(message) => ActionProgress::failed(message.clone()),
            None => ActionProgress::succeeded(),
        })
    }

    fn action_started_condition(&self, ops: &OpsRequest) -> Result<Option<Condition>> {
        Ok(Some(Condition::new(
            ConditionType::Progressing,
            true,
            "ActionStarted",
            format!("Start to process {} OpsRequest: {}", ops.spec.ops_type, ops.name()),
        )))
    }

    async fn cancel(&self, _ctx: &OpsContext, _res: &mut OpsResource) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
