//! Initial objects loaded into the in-memory store at startup

use crate::error::DaemonResult;
use dbops_store::ResourceStore;
use dbops_types::{Cluster, OpsRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Clusters and requests to create before the scheduler starts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub clusters: Vec<Cluster>,

    #[serde(default)]
    pub ops_requests: Vec<OpsRequest>,
}

impl SeedData {
    /// Read a JSON seed document
    pub fn from_file(path: &Path) -> DaemonResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Create every object; clusters first so requests find their target
    pub async fn apply(self, store: &dyn ResourceStore) -> DaemonResult<(usize, usize)> {
        let clusters = self.clusters.len();
        let requests = self.ops_requests.len();
        for cluster in self.clusters {
            store.create_cluster(cluster).await?;
        }
        for ops in self.ops_requests {
            store.create_ops_request(ops).await?;
        }
        tracing::info!(clusters, requests, "Seed data loaded");
        Ok((clusters, requests))
    }
}
