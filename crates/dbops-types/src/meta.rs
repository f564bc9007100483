//! Object identity and store metadata
//!
//! Every stored object carries a `resource_version` that the store bumps on
//! each successful write. Writers submit the version they read; a mismatch is
//! a conflict and the writer must re-read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Namespaced name identifying an object in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata shared by all stored objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    /// Assigned once on creation
    pub uid: Uuid,

    /// Free-form annotations; the engine keeps dependency links and the
    /// admission queue here
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    pub creation_timestamp: chrono::DateTime<chrono::Utc>,

    /// Optimistic concurrency token (0 = never stored)
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            annotations: BTreeMap::new(),
            creation_timestamp: chrono::Utc::now(),
            resource_version: 0,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        self.annotations.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("default", "ops-1");
        assert_eq!(key.to_string(), "default/ops-1");
    }

    #[test]
    fn test_meta_annotations() {
        let mut meta = ObjectMeta::new("default", "mycluster");
        assert_eq!(meta.resource_version, 0);
        assert!(meta.annotation("a").is_none());

        meta.set_annotation("a", "1");
        assert_eq!(meta.annotation("a"), Some("1"));
        assert_eq!(meta.remove_annotation("a"), Some("1".to_string()));
        assert_eq!(meta.key(), ObjectKey::new("default", "mycluster"));
    }
}
