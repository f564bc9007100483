//! Configuration for dbops-daemon

use dbops_engine::{EngineConfig, COMPONENT_FAILED_TIMEOUT};
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Engine tunables
    #[serde(default)]
    pub engine: EngineConfig,

    /// Simulated handler configuration
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Full reconciliation interval in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Maximum concurrent reconciliations
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciliations: usize,

    /// Only drive requests in this namespace
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            max_concurrent_reconciliations: default_max_concurrent(),
            namespace: None,
        }
    }
}

/// Simulated handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Reconcile passes before a simulated operation completes
    #[serde(default = "default_passes")]
    pub passes_until_done: u32,

    /// Delay between reconcile passes of a running operation
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// How long a failed or abnormal component is waited on before the operation fails
    #[serde(default = "default_component_failed_timeout")]
    pub component_failed_timeout_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            passes_until_done: default_passes(),
            progress_interval_ms: default_progress_interval(),
            component_failed_timeout_secs: default_component_failed_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_reconcile_interval() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    10
}

fn default_passes() -> u32 {
    3
}

fn default_progress_interval() -> u64 {
    500
}

fn default_component_failed_timeout() -> u64 {
    COMPONENT_FAILED_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// Nested keys use a double underscore, e.g.
    /// `DBOPS_SCHEDULER__RECONCILE_INTERVAL_SECS=5`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DBOPS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.engine.queue_limit, 20);
        assert_eq!(config.scheduler.max_concurrent_reconciliations, 10);
        assert!(config.scheduler.namespace.is_none());
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.scheduler.reconcile_interval_secs, 10);
        assert_eq!(config.simulation.passes_until_done, 3);
        assert_eq!(config.simulation.component_failed_timeout_secs, 30);
        assert_eq!(config.engine.wait_phase_requeue_ms, 1000);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: DaemonConfig = serde_json::from_str(
            r#"{"scheduler": {"reconcile_interval_secs": 2}, "engine": {"queue_limit": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.reconcile_interval_secs, 2);
        assert_eq!(config.scheduler.max_concurrent_reconciliations, 10);
        assert_eq!(config.engine.queue_limit, 5);
        assert_eq!(config.engine.conflict_retry.max_attempts, 5);
    }
}
