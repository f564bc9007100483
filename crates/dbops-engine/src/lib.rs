//! # dbops Engine
//!
//! Lifecycle engine for operations requests against database clusters.
//!
//! ## Overview
//!
//! Many actors may submit requests against the same cluster at once. The
//! engine admits each request, orders it against competing ones and drives
//! it to exactly one terminal phase:
//!
//! - Requests that promise a target cluster phase are mutually exclusive
//!   through a bounded admission queue stored on the cluster
//! - Requests wait for their declared prerequisites and are cancelled when
//!   one of them fails
//! - All state lives in the resource store; every step is re-entrant
//!
//! ## Key Components
//!
//! - [`OpsManager`]: Step function driving one request per call
//! - [`OpsRegistry`]: Immutable type → behaviour table built at startup
//! - [`OpsHandler`]: Per-type operation logic plugged into the engine
//! - [`OpsQueue`]: Compare-and-swap admission queue on the cluster
//! - [`EventRecorder`]: Broadcast stream of request events
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbops_engine::{
//!     EngineConfig, MockOpsHandler, OpsBehaviour, OpsManager, OpsRegistry, Step,
//! };
//! use dbops_store::InMemoryResourceStore;
//! use dbops_types::{ClusterPhase, ObjectKey, OpsType};
//!
//! # async fn example() -> dbops_engine::Result<()> {
//! let registry = OpsRegistry::builder()
//!     .register(
//!         OpsType::Restart,
//!         OpsBehaviour::new(Arc::new(MockOpsHandler::succeeding_after(1)))
//!             .from_phases(&[ClusterPhase::Running])
//!             .to_phase(ClusterPhase::Updating),
//!     )?
//!     .build();
//!
//! let store = Arc::new(InMemoryResourceStore::new());
//! let manager = OpsManager::new(store, Arc::new(registry), EngineConfig::default());
//!
//! let key = ObjectKey::new("default", "restart-pg");
//! while !manager.process(&key).await?.is_done() {}
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod admission;
pub mod config;
pub mod definition;
pub mod dependency;
pub mod error;
pub mod events;
pub mod handler;
pub mod manager;
pub mod override_by;
pub mod queue;
pub mod registry;

pub use admission::{check_cluster_phase, validate_request};
pub use config::EngineConfig;
pub use definition::{InMemoryDefinitionResolver, OpsDefinition, OpsDefinitionResolver, ParameterSpec};
pub use dependency::{resolve_dependencies, DependencyResolution};
pub use error::{ErrorKind, OpsError, Result};
pub use events::EventRecorder;
pub use handler::{
    ActionProgress, MockFailure, MockOpsHandler, OpsContext, OpsHandler, OpsResource,
    COMPONENT_FAILED_TIMEOUT,
};
pub use manager::{OpsManager, Step};
pub use override_by::{running_ops_with_same_kind, sync_override_by_for_scale_replicas};
pub use queue::{dequeue_entry, enqueue_entry, OpsQueue, QueueAdmission};
pub use registry::{OpsBehaviour, OpsRegistry, OpsRegistryBuilder};
