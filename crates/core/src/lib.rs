//! Core model for tmplsync.
//!
//! - [`Template`]: the declared record held in the watched store
//! - [`WorkflowTemplate`]: the object held by the provisioning backend
//! - [`manifest`]: loading declared records from YAML files

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod manifest;
pub mod meta;
pub mod template;

pub use error::{Error, Result};
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta};
pub use template::{
    TEMPLATE_FINALIZER, TEMPLATE_ID_ANNOTATION, Template, TemplateSpec, TemplateState,
    TemplateStatus, WorkflowTemplate,
};
