//! Store contracts

use crate::error::Result;
use async_trait::async_trait;
use dbops_types::{Cluster, ObjectKey, OpsRequest};

/// Storage for operations requests
#[async_trait]
pub trait OpsRequestStore: Send + Sync {
    /// Get a request by key; `None` once it has been deleted
    async fn get_ops_request(&self, key: &ObjectKey) -> Result<Option<OpsRequest>>;

    /// List requests, optionally restricted to one namespace
    async fn list_ops_requests(&self, namespace: Option<&str>) -> Result<Vec<OpsRequest>>;

    /// Store a new request and return it with its assigned version
    async fn create_ops_request(&self, ops: OpsRequest) -> Result<OpsRequest>;

    /// Replace metadata and spec; the stored status is kept
    async fn update_ops_request(&self, ops: &OpsRequest) -> Result<OpsRequest>;

    /// Replace status only; metadata and spec are kept
    async fn update_ops_request_status(&self, ops: &OpsRequest) -> Result<OpsRequest>;

    /// Remove a request (used by external actors, never by the engine)
    async fn delete_ops_request(&self, key: &ObjectKey) -> Result<()>;
}

/// Storage for target clusters
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Cluster>>;

    async fn list_clusters(&self, namespace: Option<&str>) -> Result<Vec<Cluster>>;

    async fn create_cluster(&self, cluster: Cluster) -> Result<Cluster>;

    /// Replace the whole cluster object
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster>;
}

/// A store holding both requests and clusters
pub trait ResourceStore: OpsRequestStore + ClusterStore {}

impl<T: OpsRequestStore + ClusterStore> ResourceStore for T {}
