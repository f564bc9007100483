//! Mutual-exclusion admission queue
//!
//! Requests whose behaviour promises a target cluster phase are recorded in
//! an ordered list on the cluster. All such requests form one exclusivity
//! domain: only the first entry may execute, except forced requests, which
//! run as soon as they are recorded. Entries that may execute have
//! `in_queue == false`.
//!
//! Every change is a compare-and-swap on the cluster object, retried on
//! conflict, because many reconciliations edit the same list.

use crate::error::{OpsError, Result};
use dbops_store::{retry_on_conflict, BackoffConfig, ResourceStore};
use dbops_types::recorder::position;
use dbops_types::{reason, ClusterPhase, ObjectKey, OpsRecorder, OpsRequest, OpsType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Outcome of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAdmission {
    /// The request may execute now
    Proceed,
    /// The request waits behind `ahead` entries
    Wait { ahead: usize },
}

/// Record `name` in `queue`, returning its admission and whether the list
/// changed
///
/// Re-enqueueing an existing entry never moves it.
pub fn enqueue_entry(
    queue: &mut Vec<OpsRecorder>,
    name: &str,
    ops_type: OpsType,
    target_phase: ClusterPhase,
    force: bool,
    limit: usize,
) -> Result<(QueueAdmission, bool)> {
    let mut changed = false;
    let idx = match position(queue, name) {
        Some(idx) => idx,
        None => {
            if queue.len() >= limit {
                return Err(OpsError::fatal(
                    reason::QUEUE_FULL,
                    format!(
                        "the admission queue of the cluster is full ({} entries), OpsRequest {} is rejected",
                        limit, name
                    ),
                ));
            }
            let mut entry = OpsRecorder::new(name, ops_type, target_phase);
            entry.in_queue = !(force || queue.is_empty());
            queue.push(entry);
            changed = true;
            queue.len() - 1
        }
    };

    if force || idx == 0 {
        if queue[idx].in_queue {
            queue[idx].in_queue = false;
            changed = true;
        }
        Ok((QueueAdmission::Proceed, changed))
    } else {
        Ok((QueueAdmission::Wait { ahead: idx }, changed))
    }
}

/// Remove `name` from `queue`; false if it was not present
pub fn dequeue_entry(queue: &mut Vec<OpsRecorder>, name: &str) -> bool {
    let before = queue.len();
    queue.retain(|r| r.name != name);
    queue.len() != before
}

/// Store-backed admission queue
#[derive(Clone)]
pub struct OpsQueue {
    store: Arc<dyn ResourceStore>,
    limit: usize,
    retry: BackoffConfig,
}

impl OpsQueue {
    pub fn new(store: Arc<dyn ResourceStore>, limit: usize, retry: BackoffConfig) -> Self {
        Self {
            store,
            limit,
            retry,
        }
    }

    /// Record the request on its cluster and report whether it may run
    ///
    /// Entries ahead of the request whose requests are gone or already
    /// terminal are pruned first, so an interrupted dequeue cannot block
    /// the queue forever.
    #[instrument(skip(self, ops, target_phase), fields(ops = %ops.key(), target_phase = %target_phase))]
    pub async fn enqueue(
        &self,
        ops: &OpsRequest,
        target_phase: ClusterPhase,
    ) -> Result<QueueAdmission> {
        let cluster_key = ops.cluster_key();
        let name = ops.name();
        let stale = self.stale_entries_ahead(&cluster_key, name).await?;

        let store = &self.store;
        let cluster_key = &cluster_key;
        let stale = &stale;
        let limit = self.limit;
        let ops_type = ops.spec.ops_type;
        let force = ops.spec.force;

        let admission = retry_on_conflict(&self.retry, move || async move {
            let mut cluster = store
                .get_cluster(cluster_key)
                .await?
                .ok_or_else(|| OpsError::Internal(format!("cluster {} is not found", cluster_key)))?;
            let mut queue = cluster.ops_queue()?;

            let mut changed = false;
            for stale_name in stale {
                changed |= dequeue_entry(&mut queue, stale_name);
            }
            let (admission, enqueued) =
                enqueue_entry(&mut queue, name, ops_type, target_phase, force, limit)?;

            if changed || enqueued {
                cluster.set_ops_queue(&queue)?;
                store.update_cluster(&cluster).await?;
            }
            Ok::<_, OpsError>(admission)
        })
        .await?;

        debug!(?admission, pruned = stale.len(), "Admission queue evaluated");
        Ok(admission)
    }

    /// Remove the request's entry; returns true if an entry was removed
    ///
    /// Idempotent: a missing cluster or entry is not an error and causes no
    /// write.
    #[instrument(skip(self), fields(cluster = %cluster_key))]
    pub async fn dequeue(&self, cluster_key: &ObjectKey, name: &str) -> Result<bool> {
        let store = &self.store;
        retry_on_conflict(&self.retry, move || async move {
            let Some(mut cluster) = store.get_cluster(cluster_key).await? else {
                return Ok(false);
            };
            let mut queue = cluster.ops_queue()?;
            if !dequeue_entry(&mut queue, name) {
                return Ok(false);
            }
            cluster.set_ops_queue(&queue)?;
            store.update_cluster(&cluster).await?;
            debug!(ops = name, remaining = queue.len(), "Dequeued OpsRequest");
            Ok::<_, OpsError>(true)
        })
        .await
    }

    /// Names of entries ahead of `name` that can never execute again
    async fn stale_entries_ahead(&self, cluster_key: &ObjectKey, name: &str) -> Result<HashSet<String>> {
        let Some(cluster) = self.store.get_cluster(cluster_key).await? else {
            return Ok(HashSet::new());
        };
        let queue = cluster.ops_queue()?;
        let ahead = position(&queue, name).unwrap_or(queue.len());

        let mut stale = HashSet::new();
        for entry in &queue[..ahead] {
            let key = ObjectKey::new(cluster_key.namespace.clone(), entry.name.clone());
            match self.store.get_ops_request(&key).await? {
                Some(ops) if !ops.is_complete() => {}
                _ => {
                    debug!(stale = %entry.name, "Pruning stale admission queue entry");
                    stale.insert(entry.name.clone());
                }
            }
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbops_store::{ClusterStore, InMemoryResourceStore, OpsRequestStore};
    use dbops_types::{Cluster, OpsPhase};
    use proptest::prelude::*;

    const LIMIT: usize = 20;

    fn enqueue(queue: &mut Vec<OpsRecorder>, name: &str) -> Result<(QueueAdmission, bool)> {
        enqueue_entry(
            queue,
            name,
            OpsType::HorizontalScaling,
            ClusterPhase::Updating,
            false,
            LIMIT,
        )
    }

    #[test]
    fn test_first_entry_proceeds_and_later_ones_wait() {
        let mut queue = Vec::new();
        assert_eq!(enqueue(&mut queue, "r1").unwrap(), (QueueAdmission::Proceed, true));
        assert_eq!(
            enqueue(&mut queue, "r2").unwrap(),
            (QueueAdmission::Wait { ahead: 1 }, true)
        );
        assert!(!queue[0].in_queue);
        assert!(queue[1].in_queue);

        // Re-enqueue is a no-op
        assert_eq!(
            enqueue(&mut queue, "r2").unwrap(),
            (QueueAdmission::Wait { ahead: 1 }, false)
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_waiting_entry_proceeds_once_head() {
        let mut queue = Vec::new();
        enqueue(&mut queue, "r1").unwrap();
        enqueue(&mut queue, "r2").unwrap();

        assert!(dequeue_entry(&mut queue, "r1"));
        assert!(!dequeue_entry(&mut queue, "r1"));
        assert_eq!(enqueue(&mut queue, "r2").unwrap(), (QueueAdmission::Proceed, true));
        assert!(!queue[0].in_queue);
    }

    #[test]
    fn test_forced_entry_proceeds_immediately() {
        let mut queue = Vec::new();
        enqueue(&mut queue, "r1").unwrap();
        let (admission, _) = enqueue_entry(
            &mut queue,
            "forced",
            OpsType::Stop,
            ClusterPhase::Stopping,
            true,
            LIMIT,
        )
        .unwrap();
        assert_eq!(admission, QueueAdmission::Proceed);
        assert_eq!(queue[1].name, "forced");
        assert!(!queue[1].in_queue);
    }

    #[test]
    fn test_full_queue_rejects_without_change() {
        let mut queue = Vec::new();
        for i in 0..LIMIT {
            enqueue(&mut queue, &format!("r{}", i)).unwrap();
        }
        let snapshot = queue.clone();

        let err = enqueue(&mut queue, "r20").unwrap_err();
        assert!(matches!(err, OpsError::Fatal { reason: reason::QUEUE_FULL, .. }));
        assert_eq!(queue, snapshot);

        // Entries already present are still answered
        assert!(enqueue(&mut queue, "r5").is_ok());
    }

    #[derive(Debug, Clone)]
    enum QueueOp {
        Enqueue(u8),
        Dequeue(u8),
    }

    fn queue_op() -> impl Strategy<Value = QueueOp> {
        prop_oneof![
            (0u8..30).prop_map(QueueOp::Enqueue),
            (0u8..30).prop_map(QueueOp::Dequeue),
        ]
    }

    proptest! {
        #[test]
        fn prop_queue_invariants(ops in proptest::collection::vec(queue_op(), 0..200)) {
            let mut queue = Vec::new();
            for op in ops {
                match op {
                    QueueOp::Enqueue(n) => {
                        let name = format!("ops-{}", n);
                        let before = queue.clone();
                        match enqueue(&mut queue, &name) {
                            Ok((QueueAdmission::Proceed, _)) => {
                                prop_assert_eq!(&queue[0].name, &name);
                            }
                            Ok((QueueAdmission::Wait { ahead }, _)) => {
                                prop_assert!(ahead > 0);
                                prop_assert_eq!(&queue[ahead].name, &name);
                            }
                            Err(_) => {
                                prop_assert_eq!(before.len(), LIMIT);
                                prop_assert_eq!(&queue, &before);
                            }
                        }
                    }
                    QueueOp::Dequeue(n) => {
                        dequeue_entry(&mut queue, &format!("ops-{}", n));
                    }
                }

                // Bounded
                prop_assert!(queue.len() <= LIMIT);
                // Unique
                let names: HashSet<&str> = queue.iter().map(|r| r.name.as_str()).collect();
                prop_assert_eq!(names.len(), queue.len());
                // Only the head may be released
                for entry in queue.iter().skip(1) {
                    prop_assert!(entry.in_queue);
                }
            }
        }
    }

    async fn setup() -> (Arc<InMemoryResourceStore>, OpsQueue) {
        let store = Arc::new(InMemoryResourceStore::new());
        store
            .create_cluster(Cluster::new("default", "pg").with_phase(ClusterPhase::Running))
            .await
            .unwrap();
        let queue = OpsQueue::new(store.clone(), LIMIT, BackoffConfig::default());
        (store, queue)
    }

    async fn create_ops(store: &InMemoryResourceStore, name: &str) -> OpsRequest {
        store
            .create_ops_request(
                OpsRequest::new("default", name, "pg", OpsType::HorizontalScaling)
                    .with_horizontal_scaling("postgresql", 3),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_backed_enqueue_and_dequeue() {
        let (store, queue) = setup().await;
        let r1 = create_ops(&store, "r1").await;
        let r2 = create_ops(&store, "r2").await;

        assert_eq!(
            queue.enqueue(&r1, ClusterPhase::Updating).await.unwrap(),
            QueueAdmission::Proceed
        );
        assert_eq!(
            queue.enqueue(&r2, ClusterPhase::Updating).await.unwrap(),
            QueueAdmission::Wait { ahead: 1 }
        );

        let key = ObjectKey::new("default", "pg");
        assert!(queue.dequeue(&key, "r1").await.unwrap());
        assert!(!queue.dequeue(&key, "r1").await.unwrap());

        let cluster = store.get_cluster(&key).await.unwrap().unwrap();
        let entries = cluster.ops_queue().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_retries_on_conflict() {
        let (store, queue) = setup().await;
        let r1 = create_ops(&store, "r1").await;

        store.inject_cluster_conflicts(2);
        assert_eq!(
            queue.enqueue(&r1, ClusterPhase::Updating).await.unwrap(),
            QueueAdmission::Proceed
        );
        let cluster = store
            .get_cluster(&ObjectKey::new("default", "pg"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cluster.ops_queue().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_head_is_pruned() {
        let (store, queue) = setup().await;
        let r1 = create_ops(&store, "r1").await;
        let r2 = create_ops(&store, "r2").await;
        queue.enqueue(&r1, ClusterPhase::Updating).await.unwrap();
        queue.enqueue(&r2, ClusterPhase::Updating).await.unwrap();

        // r1 finished but its dequeue never happened
        let mut done = store.get_ops_request(&r1.key()).await.unwrap().unwrap();
        done.status.phase = OpsPhase::Succeeded;
        store.update_ops_request_status(&done).await.unwrap();

        assert_eq!(
            queue.enqueue(&r2, ClusterPhase::Updating).await.unwrap(),
            QueueAdmission::Proceed
        );
    }

    #[tokio::test]
    async fn test_dequeue_on_missing_cluster_is_noop() {
        let (_store, queue) = setup().await;
        let missing = ObjectKey::new("default", "gone");
        assert!(!queue.dequeue(&missing, "r1").await.unwrap());
    }
}
