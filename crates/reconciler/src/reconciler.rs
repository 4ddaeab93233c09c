//! Reconciler implementation.
//!
//! One run drives one record from whatever state it is observed in toward
//! its declared state. Runs are level-triggered: nothing about the event that
//! caused the run is assumed, every decision is re-derived from the record
//! and the backend object, and every write is either idempotent or a
//! compare-and-patch against the version just read.

use std::sync::Arc;

use tmplsync_core::{ObjectKey, TEMPLATE_FINALIZER, Template, TemplateState, WorkflowTemplate};
use tracing::{debug, error, info, warn};

use crate::backend::TemplateClient;
use crate::error::{BackendError, Error, Phase, Result, StoreError};
use crate::finalizer;
use crate::store::ResourceStore;
use crate::types::ReconcileOutcome;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Finalizer token guarding backend cleanup.
    pub finalizer: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: TEMPLATE_FINALIZER.to_string(),
        }
    }
}

/// K8s-style reconciler for template records.
pub struct Reconciler {
    /// Declared records.
    store: Arc<dyn ResourceStore>,
    /// Provisioning backend.
    client: Arc<dyn TemplateClient>,
    /// Configuration.
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn TemplateClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Reconcile the record stored under `key`.
    ///
    /// Never fails: errors become [`ReconcileOutcome::Requeue`] so the caller
    /// can redeliver the key.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        match self.try_reconcile(key).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_conflict() => {
                // Someone else wrote the record first; the next run sees their write.
                info!(template = %key, error = %e, "Record changed during reconcile");
                ReconcileOutcome::Requeue(e)
            }
            Err(e) => {
                error!(template = %key, error = %e, "Reconcile failed");
                ReconcileOutcome::Requeue(e)
            }
        }
    }

    async fn try_reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let template = match self.store.get(key).await {
            Ok(template) => template,
            Err(StoreError::NotFound { .. }) => {
                debug!(template = %key, "Record no longer exists");
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(e) => return Err(Error::store(Phase::Load, e)),
        };

        let template =
            finalizer::ensure(self.store.as_ref(), template, &self.config.finalizer).await?;

        if template.is_deleting() {
            self.reconcile_delete(template).await?;
        } else {
            self.reconcile_normal(template).await?;
        }
        Ok(ReconcileOutcome::Converged)
    }

    async fn reconcile_normal(&self, template: Template) -> Result<()> {
        let remote = self.resolve_backend_object(&template).await?;
        let template = self.record_backend_id(template, &remote.id).await?;
        let template = self.reconcile_data(template, remote).await?;
        self.reconcile_status(template).await
    }

    /// Find the backend object for a record, creating it when the record has
    /// no id yet or its recorded id points at nothing.
    async fn resolve_backend_object(&self, template: &Template) -> Result<WorkflowTemplate> {
        let Some(id) = template.backend_id() else {
            return self.create_template(template).await;
        };

        match self.client.get(id, template.name()).await {
            Ok(remote) => Ok(remote),
            Err(BackendError::NotFound { .. }) => {
                warn!(
                    template = %template.key(),
                    backend_id = id,
                    "Template missing from backend, re-creating"
                );
                self.create_template(template).await
            }
            Err(e) => Err(Error::backend(Phase::Get, e)),
        }
    }

    async fn create_template(&self, template: &Template) -> Result<WorkflowTemplate> {
        let desired = WorkflowTemplate::new(
            template.name(),
            template.spec.data.clone().unwrap_or_default(),
        );

        let created = self
            .client
            .create(&desired)
            .await
            .map_err(|e| Error::backend(Phase::Create, e))?;

        info!(
            template = %template.key(),
            backend_id = %created.id,
            "Created template in backend"
        );
        Ok(created)
    }

    async fn record_backend_id(&self, template: Template, id: &str) -> Result<Template> {
        if template.backend_id() == Some(id) {
            return Ok(template);
        }

        let base_version = template.metadata.resource_version;
        let mut updated = template;
        updated.set_backend_id(id);

        let stored = self
            .store
            .patch(&updated, base_version)
            .await
            .map_err(|e| Error::store(Phase::RecordId, e))?;
        debug!(template = %stored.key(), backend_id = id, "Recorded backend id");
        Ok(stored)
    }

    /// Declared data wins over backend data. Absent declared data means the
    /// record adopts what the backend holds.
    async fn reconcile_data(&self, template: Template, remote: WorkflowTemplate) -> Result<Template> {
        match template.spec.data.as_deref() {
            Some(declared) if declared == remote.data => {
                debug!(template = %template.key(), "Template data in sync");
                Ok(template)
            }
            Some(declared) => {
                let pushed = WorkflowTemplate {
                    data: declared.to_string(),
                    ..remote
                };
                self.client
                    .update(&pushed)
                    .await
                    .map_err(|e| Error::backend(Phase::Update, e))?;
                info!(
                    template = %template.key(),
                    backend_id = %pushed.id,
                    "Pushed declared data to backend"
                );
                Ok(template)
            }
            None => {
                let base_version = template.metadata.resource_version;
                let mut updated = template;
                updated.spec.data = Some(remote.data);

                let stored = self
                    .store
                    .patch(&updated, base_version)
                    .await
                    .map_err(|e| Error::store(Phase::AdoptData, e))?;
                info!(
                    template = %stored.key(),
                    backend_id = %remote.id,
                    "Adopted template data from backend"
                );
                Ok(stored)
            }
        }
    }

    async fn reconcile_status(&self, template: Template) -> Result<()> {
        if template.is_ready() {
            debug!(template = %template.key(), "Template already ready");
            return Ok(());
        }

        let base_version = template.metadata.resource_version;
        let mut updated = template;
        updated.status.state = TemplateState::Ready;

        let stored = self
            .store
            .patch_status(&updated, base_version)
            .await
            .map_err(|e| Error::store(Phase::PatchStatus, e))?;
        info!(template = %stored.key(), state = %stored.status.state, "Template ready");
        Ok(())
    }

    /// Release the backend object, then the finalizer.
    async fn reconcile_delete(&self, template: Template) -> Result<()> {
        if let Some(id) = template.backend_id() {
            match self.client.delete(id).await {
                Ok(()) => {
                    info!(template = %template.key(), backend_id = id, "Deleted template from backend");
                }
                Err(BackendError::NotFound { .. }) => {
                    debug!(template = %template.key(), backend_id = id, "Template already gone from backend");
                }
                Err(e) => return Err(Error::backend(Phase::Delete, e)),
            }
        }

        finalizer::remove(self.store.as_ref(), template, &self.config.finalizer).await?;
        Ok(())
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ResourceStore>>,
    client: Option<Arc<dyn TemplateClient>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            client: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the resource store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the backend client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn TemplateClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the finalizer token.
    #[must_use]
    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.config.finalizer = finalizer.into();
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the store or client is missing, or the
    /// finalizer is empty.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Resource store is required"))?;
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("Template client is required"))?;
        if self.config.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("Finalizer must not be empty"));
        }

        Ok(Reconciler::new(store, client, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
