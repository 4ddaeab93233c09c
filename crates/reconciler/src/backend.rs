//! Backend client trait and an in-memory provisioning backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tmplsync_core::WorkflowTemplate;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::error::{BackendError, BackendOperation, BackendResult};

/// Narrow interface to the external provisioning backend.
#[async_trait]
pub trait TemplateClient: Send + Sync {
    /// Fetch a template by id, or by name when `id` is empty.
    ///
    /// A missing template is reported as [`BackendError::NotFound`].
    async fn get(&self, id: &str, name: &str) -> BackendResult<WorkflowTemplate>;

    /// Create a template. The returned object carries the assigned id.
    async fn create(&self, template: &WorkflowTemplate) -> BackendResult<WorkflowTemplate>;

    /// Replace the data of an existing template.
    async fn update(&self, template: &WorkflowTemplate) -> BackendResult<()>;

    /// Delete a template by id.
    async fn delete(&self, id: &str) -> BackendResult<()>;
}

#[derive(Default)]
struct CallCounters {
    get: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl CallCounters {
    const fn counter(&self, operation: BackendOperation) -> &AtomicUsize {
        match operation {
            BackendOperation::Get => &self.get,
            BackendOperation::Create => &self.create,
            BackendOperation::Update => &self.update,
            BackendOperation::Delete => &self.delete,
        }
    }
}

/// In-memory backend for tests and local runs.
///
/// Failures can be injected per operation; an injected failure stays in
/// place until cleared, like an outage.
#[derive(Default)]
pub struct InMemoryTemplateClient {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
    failures: RwLock<HashMap<BackendOperation, String>>,
    calls: CallCounters,
}

impl InMemoryTemplateClient {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pre-existing template, assigning an id if it has none.
    pub async fn insert(&self, template: WorkflowTemplate) -> WorkflowTemplate {
        let stored = if template.id.is_empty() {
            template.with_id(Ulid::new().to_string())
        } else {
            template
        };
        self.templates
            .write()
            .await
            .insert(stored.id.clone(), stored.clone());
        stored
    }

    /// Look a template up without counting as a client call.
    pub async fn find(&self, id: &str) -> Option<WorkflowTemplate> {
        self.templates.read().await.get(id).cloned()
    }

    /// Change a template's data behind the controller's back.
    pub async fn set_data_out_of_band(&self, id: &str, data: impl Into<String>) -> bool {
        self.templates
            .write()
            .await
            .get_mut(id)
            .map(|t| t.data = data.into())
            .is_some()
    }

    /// Delete a template behind the controller's back.
    pub async fn remove_out_of_band(&self, id: &str) -> Option<WorkflowTemplate> {
        self.templates.write().await.remove(id)
    }

    /// Number of templates held.
    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }

    /// Whether the backend holds no templates.
    pub async fn is_empty(&self) -> bool {
        self.templates.read().await.is_empty()
    }

    /// Make every call of `operation` fail until cleared.
    pub async fn fail(&self, operation: BackendOperation, reason: impl Into<String>) {
        self.failures.write().await.insert(operation, reason.into());
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Number of calls received for `operation`, including failed ones.
    pub fn calls(&self, operation: BackendOperation) -> usize {
        self.calls.counter(operation).load(Ordering::SeqCst)
    }

    /// Number of create, update and delete calls received.
    pub fn mutating_calls(&self) -> usize {
        [
            BackendOperation::Create,
            BackendOperation::Update,
            BackendOperation::Delete,
        ]
        .into_iter()
        .map(|op| self.calls(op))
        .fold(0, usize::saturating_add)
    }

    async fn begin(&self, operation: BackendOperation) -> BackendResult<()> {
        self.calls.counter(operation).fetch_add(1, Ordering::SeqCst);
        let failure = self.failures.read().await.get(&operation).cloned();
        failure.map_or(Ok(()), |reason| Err(BackendError::request(operation, reason)))
    }
}

#[async_trait]
impl TemplateClient for InMemoryTemplateClient {
    async fn get(&self, id: &str, name: &str) -> BackendResult<WorkflowTemplate> {
        self.begin(BackendOperation::Get).await?;
        let templates = self.templates.read().await;
        let found = if id.is_empty() {
            templates.values().find(|t| t.name == name).cloned()
        } else {
            templates.get(id).cloned()
        };
        drop(templates);

        found.ok_or_else(|| BackendError::NotFound {
            id: (if id.is_empty() { name } else { id }).to_string(),
        })
    }

    async fn create(&self, template: &WorkflowTemplate) -> BackendResult<WorkflowTemplate> {
        self.begin(BackendOperation::Create).await?;
        let created = template.clone().with_id(Ulid::new().to_string());
        self.templates
            .write()
            .await
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, template: &WorkflowTemplate) -> BackendResult<()> {
        self.begin(BackendOperation::Update).await?;
        let mut templates = self.templates.write().await;
        let stored = templates
            .get_mut(&template.id)
            .ok_or_else(|| BackendError::NotFound {
                id: template.id.clone(),
            })?;
        stored.data.clone_from(&template.data);
        Ok(())
    }

    async fn delete(&self, id: &str) -> BackendResult<()> {
        self.begin(BackendOperation::Delete).await?;
        self.templates
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_id() {
        let client = InMemoryTemplateClient::new();
        let created = client
            .create(&WorkflowTemplate::new("ubuntu", "body"))
            .await
            .unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(client.find(&created.id).await, Some(created));
        assert_eq!(client.mutating_calls(), 1);
    }

    #[tokio::test]
    async fn test_get_by_id_or_name() {
        let client = InMemoryTemplateClient::new();
        let stored = client.insert(WorkflowTemplate::new("debian", "b")).await;

        let by_id = client.get(&stored.id, "ignored").await.unwrap();
        assert_eq!(by_id.name, "debian");

        let by_name = client.get("", "debian").await.unwrap();
        assert_eq!(by_name.id, stored.id);

        let missing = client.get("nope", "debian").await;
        assert!(missing.unwrap_err().is_not_found());
        assert_eq!(client.calls(BackendOperation::Get), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let client = InMemoryTemplateClient::new();
        let ghost = WorkflowTemplate::new("ghost", "x").with_id("01GHOST");

        assert!(client.update(&ghost).await.unwrap_err().is_not_found());
        assert!(client.delete("01GHOST").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_persists_until_cleared() {
        let client = InMemoryTemplateClient::new();
        client.fail(BackendOperation::Create, "backend down").await;

        for _ in 0..2 {
            let result = client.create(&WorkflowTemplate::new("t", "")).await;
            assert!(matches!(
                result,
                Err(BackendError::Request {
                    operation: BackendOperation::Create,
                    ..
                })
            ));
        }
        assert!(client.is_empty().await);

        client.clear_failures().await;
        assert!(client.create(&WorkflowTemplate::new("t", "")).await.is_ok());
        assert_eq!(client.calls(BackendOperation::Create), 3);
    }
}
