//! dbops Daemon library
//!
//! Components of the `dbopsd` background service:
//! - Configuration loading
//! - Scheduler driving every stored request through the engine
//! - Simulated operation handlers
//! - Seed data for the in-memory store

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod seed;
pub mod simulation;

pub use config::{DaemonConfig, LoggingConfig, SchedulerConfig, SimulationConfig};
pub use error::{DaemonError, DaemonResult};
pub use scheduler::{spawn_event_logger, PassSummary, Scheduler};
pub use seed::SeedData;
pub use simulation::{simulated_registry, SimulatedHandler};
