//! Resource store trait and implementations.
//!
//! The store holds declared records and offers compare-and-patch writes: a
//! patch names the `resource_version` it was computed from and is rejected
//! with [`StoreError::Conflict`] if the stored record has moved on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use tmplsync_core::{ObjectKey, Template, TemplateState};
use tokio::sync::{RwLock, broadcast};

use crate::error::{StoreError, StoreResult};

/// Default capacity of the change notification channel.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Trait for declared record storage.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current record for a key.
    async fn get(&self, key: &ObjectKey) -> StoreResult<Template>;

    /// Write metadata and spec of `template` if the stored version is still
    /// `base_version`. Returns the record as stored after the write.
    async fn patch(&self, template: &Template, base_version: u64) -> StoreResult<Template>;

    /// Write the status of `template` if the stored version is still
    /// `base_version`. Returns the record as stored after the write.
    async fn patch_status(&self, template: &Template, base_version: u64)
    -> StoreResult<Template>;
}

/// Source of record keys for a controller: an initial listing plus a stream
/// of changed keys.
#[async_trait]
pub trait ResourceWatch: Send + Sync {
    /// Subscribe to keys of records that change from now on.
    fn watch(&self) -> broadcast::Receiver<ObjectKey>;

    /// List every key currently held.
    async fn keys(&self) -> StoreResult<Vec<ObjectKey>>;
}

/// In-memory resource store.
///
/// Besides the controller-facing [`ResourceStore`] operations it exposes the
/// declarer side (`create`, `update_spec`, `request_deletion`) and a few
/// hooks for observing and disturbing the store in tests.
pub struct InMemoryResourceStore {
    records: RwLock<HashMap<ObjectKey, Template>>,
    changes: broadcast::Sender<ObjectKey>,
    patch_calls: AtomicUsize,
    status_patch_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }
}

impl InMemoryResourceStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose change channel buffers `capacity` keys.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            records: RwLock::new(HashMap::new()),
            changes,
            patch_calls: AtomicUsize::new(0),
            status_patch_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Declare a new record. It starts at version 1 with a pending status.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a record with the same key is stored.
    pub async fn create(&self, template: Template) -> StoreResult<Template> {
        self.check_available()?;
        let key = template.key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists { key });
        }

        let mut stored = template;
        stored.metadata.resource_version = 1;
        stored.metadata.deletion_timestamp = None;
        stored.status.state = TemplateState::Pending;
        records.insert(key.clone(), stored.clone());
        drop(records);

        self.notify(key);
        Ok(stored)
    }

    /// Declarer edit of the template body.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record is stored under `key`.
    pub async fn update_spec(&self, key: &ObjectKey, data: Option<String>) -> StoreResult<Template> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;

        stored.spec.data = data;
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        let updated = stored.clone();
        drop(records);

        self.notify(key.clone());
        Ok(updated)
    }

    /// Request deletion of a record.
    ///
    /// A record without finalizers is removed at once; otherwise it is marked
    /// with a deletion timestamp and stays until its finalizers are cleared.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record is stored under `key`.
    pub async fn request_deletion(&self, key: &ObjectKey) -> StoreResult<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;

        if stored.metadata.finalizers.is_empty() {
            records.remove(key);
        } else if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        }
        drop(records);

        self.notify(key.clone());
        Ok(())
    }

    /// Whether a record is stored under `key`.
    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Number of `patch` calls received, including rejected ones.
    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    /// Number of `patch_status` calls received, including rejected ones.
    pub fn status_patch_calls(&self) -> usize {
        self.status_patch_calls.load(Ordering::SeqCst)
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "in-memory store switched off".to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, key: ObjectKey) {
        // No subscribers is fine.
        let _ = self.changes.send(key);
    }

    fn check_version(key: &ObjectKey, stored: &Template, base_version: u64) -> StoreResult<()> {
        if stored.metadata.resource_version == base_version {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                key: key.clone(),
                expected: base_version,
                actual: stored.metadata.resource_version,
            })
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Template> {
        self.check_available()?;
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn patch(&self, template: &Template, base_version: u64) -> StoreResult<Template> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let key = template.key();
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        Self::check_version(&key, stored, base_version)?;

        stored.metadata.finalizers.clone_from(&template.metadata.finalizers);
        stored.metadata.annotations.clone_from(&template.metadata.annotations);
        stored.spec.clone_from(&template.spec);
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        let updated = stored.clone();

        // The last finalizer of a deleting record releases it.
        if updated.is_deleting() && updated.metadata.finalizers.is_empty() {
            records.remove(&key);
        }
        drop(records);

        self.notify(key);
        Ok(updated)
    }

    async fn patch_status(
        &self,
        template: &Template,
        base_version: u64,
    ) -> StoreResult<Template> {
        self.status_patch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let key = template.key();
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        Self::check_version(&key, stored, base_version)?;

        stored.status.clone_from(&template.status);
        stored.metadata.resource_version = stored.metadata.resource_version.saturating_add(1);
        let updated = stored.clone();
        drop(records);

        self.notify(key);
        Ok(updated)
    }
}

#[async_trait]
impl ResourceWatch for InMemoryResourceStore {
    fn watch(&self) -> broadcast::Receiver<ObjectKey> {
        self.changes.subscribe()
    }

    async fn keys(&self) -> StoreResult<Vec<ObjectKey>> {
        self.check_available()?;
        Ok(self.records.read().await.keys().cloned().sorted().collect_vec())
    }
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingResourceStore<S: ResourceStore> {
    inner: S,
}

impl<S: ResourceStore> TracingResourceStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TracingResourceStore<S> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Template> {
        tracing::trace!(template = %key, "Getting record");
        self.inner.get(key).await
    }

    async fn patch(&self, template: &Template, base_version: u64) -> StoreResult<Template> {
        tracing::debug!(
            template = %template.key(),
            base_version,
            "Patching record"
        );
        let result = self.inner.patch(template, base_version).await;
        match &result {
            Ok(stored) => {
                tracing::trace!(version = stored.metadata.resource_version, "Record patched");
            }
            Err(e) => tracing::debug!(error = %e, "Record patch rejected"),
        }
        result
    }

    async fn patch_status(
        &self,
        template: &Template,
        base_version: u64,
    ) -> StoreResult<Template> {
        tracing::debug!(
            template = %template.key(),
            base_version,
            state = %template.status.state,
            "Patching record status"
        );
        let result = self.inner.patch_status(template, base_version).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Status patch rejected");
        }
        result
    }
}

#[async_trait]
impl<S: ResourceStore + ResourceWatch> ResourceWatch for TracingResourceStore<S> {
    fn watch(&self) -> broadcast::Receiver<ObjectKey> {
        self.inner.watch()
    }

    async fn keys(&self) -> StoreResult<Vec<ObjectKey>> {
        self.inner.keys().await
    }
}
