//! Definitions for custom operation types
//!
//! A custom request names an external definition. The definition lists the
//! parameters the operation accepts; request parameters are merged over the
//! definition's defaults before the request is validated.

use crate::error::{OpsError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dbops_types::{Cluster, CustomOpsSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One accepted parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// An external operation definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsDefinition {
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    /// Components the operation may target; empty means any
    #[serde(default)]
    pub component_names: Vec<String>,
}

impl OpsDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            component_names: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, required: bool, default: Option<&str>) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.to_string(),
            required,
            default: default.map(String::from),
        });
        self
    }

    pub fn with_components(mut self, names: &[&str]) -> Self {
        self.component_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Request parameters laid over the defaults
    ///
    /// Unknown parameters and required parameters with neither a value
    /// nor a default are rejected.
    pub fn merge_params(&self, params: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        if let Some(unknown) = params
            .keys()
            .find(|k| !self.parameters.iter().any(|p| &p.name == *k))
        {
            return Err(OpsError::Validation(format!(
                "parameter {} is not defined in OpsDefinition {}",
                unknown, self.name
            )));
        }

        let mut merged = BTreeMap::new();
        for param in &self.parameters {
            match params.get(&param.name).or(param.default.as_ref()) {
                Some(value) => {
                    merged.insert(param.name.clone(), value.clone());
                }
                None if param.required => {
                    return Err(OpsError::Validation(format!(
                        "parameter {} is required by OpsDefinition {}",
                        param.name, self.name
                    )))
                }
                None => {}
            }
        }
        Ok(merged)
    }

    /// Resolve a custom request against this definition
    pub fn validate(&self, custom: &CustomOpsSpec, cluster: Option<&Cluster>) -> Result<BTreeMap<String, String>> {
        if let Some(component) = &custom.component_name {
            if !self.component_names.is_empty() && !self.component_names.contains(component) {
                return Err(OpsError::Validation(format!(
                    "component {} is not supported by OpsDefinition {}",
                    component, self.name
                )));
            }
            if let Some(cluster) = cluster {
                if cluster.component(component).is_none() {
                    return Err(OpsError::Validation(format!(
                        "component {} is not found in cluster {}",
                        component, cluster.metadata.name
                    )));
                }
            }
        }
        self.merge_params(&custom.params)
    }
}

/// Looks up operation definitions by name
#[async_trait]
pub trait OpsDefinitionResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<OpsDefinition>>;
}

/// In-memory definition catalog
#[derive(Default)]
pub struct InMemoryDefinitionResolver {
    definitions: DashMap<String, OpsDefinition>,
}

impl InMemoryDefinitionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, definition: OpsDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }
}

#[async_trait]
impl OpsDefinitionResolver for InMemoryDefinitionResolver {
    async fn resolve(&self, name: &str) -> Result<Option<OpsDefinition>> {
        Ok(self.definitions.get(name).map(|d| d.clone()))
    }
}
