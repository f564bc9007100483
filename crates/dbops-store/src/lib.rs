//! dbops Store - Versioned resource store
//!
//! The engine keeps no state of its own; everything it knows lives in the
//! resource store. This crate defines the store contract and an in-memory
//! implementation:
//!
//! - **OpsRequestStore**: operations requests, with separate status writes
//! - **ClusterStore**: target clusters (the engine only edits annotations)
//! - **retry_on_conflict**: compare-and-swap retry loop for shared state
//!
//! ## Optimistic Concurrency
//!
//! Every object carries a `resource_version`. An update must present the
//! version it was read at; the store rejects stale writes with
//! [`StoreError::Conflict`] and bumps the version on success.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod resource;
pub mod retry;

// Re-exports
pub use error::{Result, StoreError};
pub use memory::InMemoryResourceStore;
pub use resource::{ClusterStore, OpsRequestStore, ResourceStore};
pub use retry::{retry_on_conflict, BackoffConfig, ConflictError};
