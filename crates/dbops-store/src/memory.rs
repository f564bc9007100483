//! In-memory implementation of the store traits
//!
//! Suitable for development and testing. Each write is applied under the
//! map shard lock, so the version check and the write are atomic.

use crate::error::{Result, StoreError};
use crate::resource::{ClusterStore, OpsRequestStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dbops_types::{Cluster, ObjectKey, ObjectMeta, OpsRequest};
use std::sync::atomic::{AtomicU32, Ordering};

/// In-memory resource store
pub struct InMemoryResourceStore {
    ops_requests: DashMap<ObjectKey, OpsRequest>,
    clusters: DashMap<ObjectKey, Cluster>,
    /// Pending forced conflicts for cluster writes
    injected_conflicts: AtomicU32,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            ops_requests: DashMap::new(),
            clusters: DashMap::new(),
            injected_conflicts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` cluster updates fail with a conflict
    ///
    /// Simulates a concurrent writer racing the engine.
    pub fn inject_cluster_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_version(key: &ObjectKey, stored: &ObjectMeta, presented: &ObjectMeta) -> Result<()> {
    if stored.resource_version != presented.resource_version {
        return Err(StoreError::Conflict {
            key: key.clone(),
            current: stored.resource_version,
            expected: presented.resource_version,
        });
    }
    Ok(())
}

fn in_namespace(meta: &ObjectMeta, namespace: Option<&str>) -> bool {
    namespace.map_or(true, |ns| meta.namespace == ns)
}

#[async_trait]
impl OpsRequestStore for InMemoryResourceStore {
    async fn get_ops_request(&self, key: &ObjectKey) -> Result<Option<OpsRequest>> {
        Ok(self.ops_requests.get(key).map(|o| o.clone()))
    }

    async fn list_ops_requests(&self, namespace: Option<&str>) -> Result<Vec<OpsRequest>> {
        let mut list: Vec<OpsRequest> = self
            .ops_requests
            .iter()
            .filter(|o| in_namespace(&o.metadata, namespace))
            .map(|o| o.value().clone())
            .collect();
        list.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        Ok(list)
    }

    async fn create_ops_request(&self, mut ops: OpsRequest) -> Result<OpsRequest> {
        let key = ops.key();
        match self.ops_requests.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(slot) => {
                ops.metadata.resource_version = 1;
                slot.insert(ops.clone());
                Ok(ops)
            }
        }
    }

    async fn update_ops_request(&self, ops: &OpsRequest) -> Result<OpsRequest> {
        let key = ops.key();
        let mut stored = self
            .ops_requests
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_version(&key, &stored.metadata, &ops.metadata)?;

        let status = stored.status.clone();
        *stored = ops.clone();
        stored.status = status;
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn update_ops_request_status(&self, ops: &OpsRequest) -> Result<OpsRequest> {
        let key = ops.key();
        let mut stored = self
            .ops_requests
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_version(&key, &stored.metadata, &ops.metadata)?;

        stored.status = ops.status.clone();
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn delete_ops_request(&self, key: &ObjectKey) -> Result<()> {
        self.ops_requests.remove(key);
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for InMemoryResourceStore {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>> {
        Ok(self.clusters.get(key).map(|c| c.clone()))
    }

    async fn list_clusters(&self, namespace: Option<&str>) -> Result<Vec<Cluster>> {
        Ok(self
            .clusters
            .iter()
            .filter(|c| in_namespace(&c.metadata, namespace))
            .map(|c| c.value().clone())
            .collect())
    }

    async fn create_cluster(&self, mut cluster: Cluster) -> Result<Cluster> {
        let key = cluster.key();
        match self.clusters.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(key)),
            Entry::Vacant(slot) => {
                cluster.metadata.resource_version = 1;
                slot.insert(cluster.clone());
                Ok(cluster)
            }
        }
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let key = cluster.key();
        let mut stored = self
            .clusters
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if self.take_injected_conflict() {
            return Err(StoreError::Conflict {
                key,
                current: stored.metadata.resource_version,
                expected: cluster.metadata.resource_version,
            });
        }
        check_version(&key, &stored.metadata, &cluster.metadata)?;

        *stored = cluster.clone();
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }
}
