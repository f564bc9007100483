//! Progress of multi-file configuration changes

use serde::{Deserialize, Serialize};

/// Counter value before any instance has applied the change
pub const NOT_STARTED: i32 = -1;

/// Counter value while the number of affected instances is unknown
pub const UNCONFIRMED: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconfigurePhase {
    /// Writing the new configuration to storage
    #[default]
    Persisting,
    Persisted,
    /// Applying to instances, retried by the handler
    Retry,
    Succeeded,
    Failed,
}

/// Per-template progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItemStatus {
    /// Configuration template name
    pub name: String,

    pub status: ReconfigurePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Instances that applied the change
    pub succeed_count: i32,

    /// Instances expected to apply the change
    pub expected_count: i32,
}

impl ConfigurationItemStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ReconfigurePhase::Persisting,
            message: None,
            succeed_count: NOT_STARTED,
            expected_count: UNCONFIRMED,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ReconfigurePhase::Succeeded | ReconfigurePhase::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconfiguringStatus {
    #[serde(default)]
    pub configuration_status: Vec<ConfigurationItemStatus>,
}

impl ReconfiguringStatus {
    /// Find or append the item for `template`, then apply `update` to it
    pub fn update_by_template<F, E>(&mut self, template: &str, update: F) -> Result<(), E>
    where
        F: FnOnce(&mut ConfigurationItemStatus) -> Result<(), E>,
    {
        let idx = match self
            .configuration_status
            .iter()
            .position(|s| s.name == template)
        {
            Some(idx) => idx,
            None => {
                self.configuration_status
                    .push(ConfigurationItemStatus::new(template));
                self.configuration_status.len() - 1
            }
        };
        update(&mut self.configuration_status[idx])
    }

    pub fn is_finished(&self) -> bool {
        self.configuration_status.iter().all(|s| s.is_finished())
    }
}
