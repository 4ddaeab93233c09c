//! K8s-style reconciliation loop for template records.
//!
//! This crate keeps each declared [`Template`](tmplsync_core::Template) in
//! sync with its object in the provisioning backend:
//!
//! - **Declared state**: the record in the [`ResourceStore`]
//! - **Observed state**: the object behind the [`TemplateClient`]
//! - **Convergence**: create or adopt, push declared data, mark Ready
//! - **Finalization**: delete the backend object before the record may go
//!
//! # Key Concepts
//!
//! ## Level-triggered runs
//!
//! [`Reconciler::reconcile`] is given only a key. It loads the record and
//! re-derives every action from what it finds, so a run may be repeated,
//! duplicated or interrupted at any point and the next run picks up from
//! whatever was persisted.
//!
//! ## Compare-and-patch
//!
//! Every write to a record names the version it was computed from. A
//! concurrent edit makes the write fail, the run ends with
//! [`ReconcileOutcome::Requeue`], and redelivery retries from the top.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tmplsync_core::{ObjectKey, Template};
//! use tmplsync_reconciler::{
//!     InMemoryResourceStore, InMemoryTemplateClient, ReconcilerBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryResourceStore::new());
//!     let client = Arc::new(InMemoryTemplateClient::new());
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_store(store.clone())
//!         .with_client(client)
//!         .build()
//!         .unwrap();
//!
//!     store.create(Template::new("default", "ubuntu", None)).await.unwrap();
//!     let outcome = reconciler.reconcile(&ObjectKey::new("default", "ubuntu")).await;
//!     assert!(outcome.is_converged());
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod types;

// Re-export main types
pub use backend::{InMemoryTemplateClient, TemplateClient};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerHandle};
pub use error::{
    BackendError, BackendOperation, BackendResult, Error, Phase, Result, StoreError, StoreResult,
};
pub use queue::WorkQueue;
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use store::{InMemoryResourceStore, ResourceStore, ResourceWatch, TracingResourceStore};
pub use types::ReconcileOutcome;
