#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # tmplsync
//!
//! Keeps declared workflow templates in sync with a provisioning backend.
//!
//! This library re-exports the workspace crates for convenience.

pub use tmplsync_core;
pub use tmplsync_reconciler;

pub mod cli;
pub mod runtime;
