//! The declared template record and its backend counterpart.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::meta::{ObjectKey, ObjectMeta};

/// Finalizer token that keeps a record alive until its backend object is gone.
pub const TEMPLATE_FINALIZER: &str = "template.tinkerbell.org";

/// Annotation holding the backend identifier once it is known.
pub const TEMPLATE_ID_ANNOTATION: &str = "tink.tinkerbell.org/id";

/// Declared state of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Template body. `None` means "adopt whatever the backend holds".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Last converged state, surfaced for observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateState {
    #[default]
    Pending,
    Ready,
}

impl std::fmt::Display for TemplateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Status sub-resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStatus {
    #[serde(default)]
    pub state: TemplateState,
}

/// A declared template record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TemplateSpec,
    #[serde(default)]
    pub status: TemplateStatus,
}

impl Template {
    /// Create a new record with the given identity and declared data.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, data: Option<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: TemplateSpec { data },
            status: TemplateStatus::default(),
        }
    }

    /// Parse a record from a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns `YamlParseFailed` for malformed YAML and `InvalidRecord` when
    /// the record has no usable name.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let template: Self =
            serde_yaml::from_str(source).map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Check that the record can be stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the name or namespace is empty or contains `/`.
    pub fn validate(&self) -> Result<()> {
        let meta = &self.metadata;
        if meta.name.trim().is_empty() {
            return Err(Error::invalid_record("metadata.name must not be empty"));
        }
        if meta.namespace.trim().is_empty() {
            return Err(Error::invalid_record(format!(
                "metadata.namespace of '{}' must not be empty",
                meta.name
            )));
        }
        if meta.name.contains('/') || meta.namespace.contains('/') {
            return Err(Error::invalid_record(format!(
                "'{}/{}' must not contain '/'",
                meta.namespace, meta.name
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Backend identifier, if one has been recorded.
    pub fn backend_id(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(TEMPLATE_ID_ANNOTATION)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Record the backend identifier. Returns whether the record changed.
    pub fn set_backend_id(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.backend_id() == Some(id.as_str()) {
            return false;
        }
        self.metadata
            .annotations
            .insert(TEMPLATE_ID_ANNOTATION.to_string(), id);
        true
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns whether the record changed.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns whether the record changed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != finalizer);
        self.metadata.finalizers.len() != before
    }

    /// Whether deletion has been requested.
    pub const fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.status.state == TemplateState::Ready
    }
}

/// The backend's representation of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Backend-assigned identifier; empty until created.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: String,
}

impl WorkflowTemplate {
    /// Describe a template that has not been created yet.
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            data: data.into(),
        }
    }

    /// Builder-style identifier assignment.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MANIFEST: &str = r"
metadata:
  name: ubuntu-focal
  namespace: tink-system
  annotations:
    tink.tinkerbell.org/id: 01HZX
spec:
  data: |
    version: '0.1'
    name: ubuntu-focal
";

    #[test]
    fn test_from_yaml() {
        let template = Template::from_yaml(MANIFEST).unwrap();
        assert_eq!(template.key(), ObjectKey::new("tink-system", "ubuntu-focal"));
        assert_eq!(template.backend_id(), Some("01HZX"));
        assert!(template.spec.data.as_deref().unwrap().contains("version"));
        assert_eq!(template.status.state, TemplateState::Pending);
    }

    #[test]
    fn test_from_yaml_defaults_namespace() {
        let template = Template::from_yaml("metadata:\n  name: bare\n").unwrap();
        assert_eq!(template.metadata.namespace, "default");
        assert!(template.spec.data.is_none());
    }

    #[test]
    fn test_from_yaml_rejects_empty_name() {
        let result = Template::from_yaml("metadata:\n  name: ''\n");
        assert!(matches!(result, Err(Error::InvalidRecord { .. })));
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        let result = Template::from_yaml("metadata: [unclosed");
        assert!(matches!(result, Err(Error::YamlParseFailed { .. })));
    }

    #[test]
    fn test_backend_id_empty_is_absent() {
        let mut template = Template::new("default", "t", None);
        assert_eq!(template.backend_id(), None);

        template
            .metadata
            .annotations
            .insert(TEMPLATE_ID_ANNOTATION.to_string(), String::new());
        assert_eq!(template.backend_id(), None);

        assert!(template.set_backend_id("abc"));
        assert!(!template.set_backend_id("abc"));
        assert_eq!(template.backend_id(), Some("abc"));
    }

    #[test]
    fn test_finalizer_helpers_are_idempotent() {
        let mut template = Template::new("default", "t", None);
        assert!(template.add_finalizer(TEMPLATE_FINALIZER));
        assert!(!template.add_finalizer(TEMPLATE_FINALIZER));
        assert_eq!(template.metadata.finalizers.len(), 1);

        assert!(template.remove_finalizer(TEMPLATE_FINALIZER));
        assert!(!template.remove_finalizer(TEMPLATE_FINALIZER));
        assert!(!template.has_finalizer(TEMPLATE_FINALIZER));
    }
}
