#![allow(dead_code)]

use dbops_engine::{EngineConfig, MockOpsHandler, OpsBehaviour, OpsManager, OpsRegistry, Step};
use dbops_store::{ClusterStore, InMemoryResourceStore, OpsRequestStore};
use dbops_types::{Cluster, ClusterPhase, ObjectKey, OpsPhase, OpsRecorder, OpsRequest, OpsType};
use std::sync::Arc;

pub const NAMESPACE: &str = "default";
pub const CLUSTER: &str = "pg";
pub const COMPONENT: &str = "postgresql";

pub struct Harness {
    pub store: Arc<InMemoryResourceStore>,
    pub manager: Arc<OpsManager>,
}

/// Behaviours mirroring a real deployment: every replica-changing type
/// promises a cluster phase and so shares the admission queue
pub fn registry(scaling: Arc<MockOpsHandler>, lifecycle: Arc<MockOpsHandler>) -> OpsRegistry {
    OpsRegistry::builder()
        .register(
            OpsType::HorizontalScaling,
            OpsBehaviour::new(scaling)
                .from_phases(&[ClusterPhase::Running])
                .to_phase(ClusterPhase::Updating),
        )
        .unwrap()
        .register(
            OpsType::Restart,
            OpsBehaviour::new(lifecycle.clone())
                .from_phases(&[ClusterPhase::Running])
                .to_phase(ClusterPhase::Updating)
                .cancellable(),
        )
        .unwrap()
        .register(
            OpsType::Stop,
            OpsBehaviour::new(lifecycle.clone())
                .from_phases(&[ClusterPhase::Running])
                .to_phase(ClusterPhase::Stopping),
        )
        .unwrap()
        .register(
            OpsType::Start,
            OpsBehaviour::new(lifecycle)
                .from_phases(&[ClusterPhase::Stopped])
                .to_phase(ClusterPhase::Updating),
        )
        .unwrap()
        .build()
}

pub async fn harness_with(registry: OpsRegistry, config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryResourceStore::new());
    store
        .create_cluster(
            Cluster::new(NAMESPACE, CLUSTER)
                .with_component(COMPONENT, 3)
                .with_phase(ClusterPhase::Running),
        )
        .await
        .unwrap();
    let manager = Arc::new(OpsManager::new(store.clone(), Arc::new(registry), config));
    Harness { store, manager }
}

pub async fn harness(passes: u32) -> Harness {
    let handler = Arc::new(MockOpsHandler::succeeding_after(passes));
    harness_with(registry(handler.clone(), handler), EngineConfig::default()).await
}

pub fn horizontal_scaling(name: &str, replicas: u32) -> OpsRequest {
    OpsRequest::new(NAMESPACE, name, CLUSTER, OpsType::HorizontalScaling)
        .with_horizontal_scaling(COMPONENT, replicas)
}

pub fn restart(name: &str) -> OpsRequest {
    OpsRequest::new(NAMESPACE, name, CLUSTER, OpsType::Restart).with_restart(COMPONENT)
}

impl Harness {
    pub async fn submit(&self, ops: OpsRequest) -> ObjectKey {
        self.store.create_ops_request(ops).await.unwrap().key()
    }

    pub async fn get(&self, key: &ObjectKey) -> OpsRequest {
        self.store.get_ops_request(key).await.unwrap().unwrap()
    }

    pub async fn phase(&self, key: &ObjectKey) -> OpsPhase {
        self.get(key).await.phase()
    }

    pub async fn cluster(&self) -> Cluster {
        self.store
            .get_cluster(&ObjectKey::new(NAMESPACE, CLUSTER))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn queue(&self) -> Vec<OpsRecorder> {
        self.cluster().await.ops_queue().unwrap()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        self.queue().await.into_iter().map(|r| r.name).collect()
    }

    pub async fn set_cluster_phase(&self, phase: ClusterPhase) {
        let mut cluster = self.cluster().await;
        cluster.status.phase = phase;
        self.store.update_cluster(&cluster).await.unwrap();
    }

    pub async fn set_replicas(&self, component: &str, replicas: u32) {
        let mut cluster = self.cluster().await;
        for spec in cluster.spec.component_specs.iter_mut() {
            if spec.name == component {
                spec.replicas = replicas;
            }
        }
        self.store.update_cluster(&cluster).await.unwrap();
    }

    pub async fn step(&self, key: &ObjectKey) -> Step {
        self.manager.process(key).await.unwrap()
    }

    /// Drive until terminal, with a bound so a stuck request fails the test
    pub async fn drive(&self, key: &ObjectKey) -> OpsPhase {
        for _ in 0..100 {
            if self.step(key).await.is_done() {
                return self.phase(key).await;
            }
        }
        panic!("{} did not reach a terminal phase", key);
    }
}
