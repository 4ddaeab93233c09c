//! Finalizer handling for declared records.
//!
//! The finalizer is added before anything is created in the backend and
//! removed only once the backend object is confirmed gone, so the store can
//! never drop a record that still owns a backend object.

use tmplsync_core::Template;
use tracing::{debug, info};

use crate::error::{Error, Phase, Result};
use crate::store::ResourceStore;

/// Make sure `finalizer` is on the record, patching only if it is missing.
///
/// Records already being deleted are returned untouched: a deleting record
/// cannot gain new finalizers.
///
/// # Errors
///
/// Returns a `Store` error in phase `AddFinalizer` if the patch is rejected.
pub async fn ensure(store: &dyn ResourceStore, template: Template, finalizer: &str) -> Result<Template> {
    if template.is_deleting() || template.has_finalizer(finalizer) {
        return Ok(template);
    }

    let base_version = template.metadata.resource_version;
    let mut updated = template;
    updated.add_finalizer(finalizer);

    let stored = store
        .patch(&updated, base_version)
        .await
        .map_err(|e| Error::store(Phase::AddFinalizer, e))?;
    debug!(template = %stored.key(), finalizer, "Added finalizer");
    Ok(stored)
}

/// Remove `finalizer` from the record, patching only if it is present.
///
/// # Errors
///
/// Returns a `Store` error in phase `RemoveFinalizer` if the patch is rejected.
pub async fn remove(store: &dyn ResourceStore, template: Template, finalizer: &str) -> Result<Template> {
    if !template.has_finalizer(finalizer) {
        return Ok(template);
    }

    let base_version = template.metadata.resource_version;
    let mut updated = template;
    updated.remove_finalizer(finalizer);

    let stored = store
        .patch(&updated, base_version)
        .await
        .map_err(|e| Error::store(Phase::RemoveFinalizer, e))?;
    info!(template = %stored.key(), finalizer, "Removed finalizer");
    Ok(stored)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryResourceStore;
    use tmplsync_core::TEMPLATE_FINALIZER;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let store = InMemoryResourceStore::new();
        let created = store
            .create(Template::new("default", "t", None))
            .await
            .unwrap();

        let first = ensure(&store, created, TEMPLATE_FINALIZER).await.unwrap();
        let second = ensure(&store, first.clone(), TEMPLATE_FINALIZER).await.unwrap();

        assert!(second.has_finalizer(TEMPLATE_FINALIZER));
        assert_eq!(first, second);
        assert_eq!(store.patch_calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_skips_deleting_record() {
        let store = InMemoryResourceStore::new();
        let mut template = Template::new("default", "t", None);
        template.metadata.deletion_timestamp = Some(chrono::Utc::now());

        let returned = ensure(&store, template, TEMPLATE_FINALIZER).await.unwrap();
        assert!(!returned.has_finalizer(TEMPLATE_FINALIZER));
        assert_eq!(store.patch_calls(), 0);
    }

    #[tokio::test]
    async fn test_remove_without_finalizer_is_noop() {
        let store = InMemoryResourceStore::new();
        let created = store
            .create(Template::new("default", "t", None))
            .await
            .unwrap();

        let returned = remove(&store, created, TEMPLATE_FINALIZER).await.unwrap();
        assert_eq!(returned.metadata.resource_version, 1);
        assert_eq!(store.patch_calls(), 0);
    }

    #[tokio::test]
    async fn test_conflict_is_tagged_with_phase() {
        let store = InMemoryResourceStore::new();
        let created = store
            .create(Template::new("default", "t", None))
            .await
            .unwrap();
        store
            .update_spec(&created.key(), Some("edited".to_string()))
            .await
            .unwrap();

        let err = ensure(&store, created, TEMPLATE_FINALIZER).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.phase(), Some(Phase::AddFinalizer));
    }
}
