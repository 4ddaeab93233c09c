//! Object identity and store bookkeeping shared by every record.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace used when a manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Identity of a record within the store: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new key.
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

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Metadata maintained by the store and by controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Version used as the base for compare-and-patch. Bumped by the store on
    /// every successful write.
    #[serde(default)]
    pub resource_version: u64,

    /// Tokens that defer final removal of the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Set by the store once deletion has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a new, not yet stored, record.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            resource_version: 0,
            finalizers: Vec::new(),
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
        }
    }

    /// Key of the record this metadata belongs to.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ObjectKey::new("tink-system", "ubuntu-focal");
        assert_eq!(key.to_string(), "tink-system/ubuntu-focal");
    }

    #[test]
    fn test_meta_key_matches_fields() {
        let meta = ObjectMeta::new("default", "debian");
        assert_eq!(meta.key(), ObjectKey::new("default", "debian"));
        assert_eq!(meta.resource_version, 0);
        assert!(meta.deletion_timestamp.is_none());
    }
}
