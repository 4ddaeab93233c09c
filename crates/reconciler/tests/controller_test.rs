//! End-to-end tests of the controller loop against the in-memory store and
//! backend: records declared in the store converge without anyone calling
//! the reconciler by hand.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tmplsync_core::{ObjectKey, Template};
use tmplsync_reconciler::{
    BackendOperation, Controller, ControllerConfig, InMemoryResourceStore, InMemoryTemplateClient,
    Reconciler, ReconcilerConfig, ResourceStore,
};

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn fast_config() -> ControllerConfig {
    ControllerConfig::default()
        .workers(2)
        .backoff(Duration::from_millis(5), Duration::from_millis(40))
}

fn start(
    store: &Arc<InMemoryResourceStore>,
    client: &Arc<InMemoryTemplateClient>,
    config: ControllerConfig,
) -> tmplsync_reconciler::ControllerHandle {
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        client.clone(),
        ReconcilerConfig::default(),
    ));
    Controller::new(reconciler, store.clone(), config)
        .unwrap()
        .start()
}

async fn is_ready(store: &InMemoryResourceStore, key: &ObjectKey) -> bool {
    store.get(key).await.is_ok_and(|t| t.is_ready())
}

#[tokio::test]
async fn test_existing_and_new_records_converge() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    let early = store
        .create(Template::new("default", "early", Some("1".to_string())))
        .await
        .unwrap()
        .key();

    let handle = start(&store, &client, fast_config());

    let late = store
        .create(Template::new("default", "late", Some("2".to_string())))
        .await
        .unwrap()
        .key();

    let converged = eventually(|| {
        let store = store.clone();
        let (early, late) = (early.clone(), late.clone());
        async move { is_ready(&store, &early).await && is_ready(&store, &late).await }
    })
    .await;
    handle.shutdown().await;

    assert!(converged);
    assert_eq!(client.len().await, 2);
    assert_eq!(client.calls(BackendOperation::Create), 2);
}

#[tokio::test]
async fn test_declarer_edit_is_pushed() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    let key = store
        .create(Template::new("default", "t", Some("v1".to_string())))
        .await
        .unwrap()
        .key();
    let handle = start(&store, &client, fast_config());

    assert!(eventually(|| is_ready(&store, &key)).await);
    store.update_spec(&key, Some("v2".to_string())).await.unwrap();

    let pushed = eventually(|| {
        let (store, client, key) = (store.clone(), client.clone(), key.clone());
        async move {
            let Ok(record) = store.get(&key).await else {
                return false;
            };
            match record.backend_id() {
                Some(id) => client.find(id).await.is_some_and(|t| t.data == "v2"),
                None => false,
            }
        }
    })
    .await;
    handle.shutdown().await;

    assert!(pushed);
}

#[tokio::test]
async fn test_failed_runs_are_retried_until_backend_recovers() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    client.fail(BackendOperation::Create, "backend starting up").await;
    let key = store
        .create(Template::new("default", "t", Some("x".to_string())))
        .await
        .unwrap()
        .key();

    let handle = start(&store, &client, fast_config());

    let retried = eventually(|| {
        let client = client.clone();
        async move { client.calls(BackendOperation::Create) >= 2 }
    })
    .await;
    assert!(retried);
    assert!(!is_ready(&store, &key).await);

    client.clear_failures().await;
    let converged = eventually(|| is_ready(&store, &key)).await;
    handle.shutdown().await;

    assert!(converged);
    assert_eq!(client.len().await, 1);
}

#[tokio::test]
async fn test_deletion_is_finalized() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    let key = store
        .create(Template::new("default", "t", Some("x".to_string())))
        .await
        .unwrap()
        .key();
    let handle = start(&store, &client, fast_config());
    assert!(eventually(|| is_ready(&store, &key)).await);

    store.request_deletion(&key).await.unwrap();

    let removed = eventually(|| {
        let store = store.clone();
        let key = key.clone();
        async move { !store.contains(&key).await }
    })
    .await;
    handle.shutdown().await;

    assert!(removed);
    assert!(client.is_empty().await);
}

#[tokio::test]
async fn test_resync_repairs_out_of_band_deletion() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    let key = store
        .create(Template::new("default", "t", Some("x".to_string())))
        .await
        .unwrap()
        .key();
    let config = fast_config().resync_interval(Some(Duration::from_millis(20)));
    let handle = start(&store, &client, config);
    assert!(eventually(|| is_ready(&store, &key)).await);

    // No store event follows this; only the resync notices.
    let id = store.get(&key).await.unwrap().backend_id().unwrap().to_string();
    client.remove_out_of_band(&id).await;

    let recreated = eventually(|| {
        let client = client.clone();
        async move { client.calls(BackendOperation::Create) == 2 && client.len().await == 1 }
    })
    .await;
    handle.shutdown().await;

    assert!(recreated);
}

#[test]
fn test_invalid_config_is_rejected() {
    let store = Arc::new(InMemoryResourceStore::new());
    let client = Arc::new(InMemoryTemplateClient::new());
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        client,
        ReconcilerConfig::default(),
    ));

    let result = Controller::new(reconciler, store, ControllerConfig::default().workers(0));
    assert!(result.is_err());
}
