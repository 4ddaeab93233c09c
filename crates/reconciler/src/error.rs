//! Error types for the reconciler crate.
//!
//! Collaborator failures ([`StoreError`], [`BackendError`]) are wrapped with
//! the [`Phase`] of the run in which they happened before being surfaced.

use std::fmt;

use thiserror::Error;
use tmplsync_core::ObjectKey;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for resource store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for backend client operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Outcomes of the resource store other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record '{key}' not found")]
    NotFound { key: ObjectKey },

    #[error("record '{key}' already exists")]
    AlreadyExists { key: ObjectKey },

    #[error("record '{key}' changed underneath the patch (base version {expected}, stored {actual})")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Backend client operations, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Outcomes of the backend client other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("template '{id}' not found in backend")]
    NotFound { id: String },

    #[error("backend {operation} request failed: {reason}")]
    Request {
        operation: BackendOperation,
        reason: String,
    },
}

impl BackendError {
    /// Create a request failure.
    pub fn request(operation: BackendOperation, reason: impl Into<String>) -> Self {
        Self::Request {
            operation,
            reason: reason.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Step of a reconcile run in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    AddFinalizer,
    Create,
    Get,
    RecordId,
    Update,
    AdoptData,
    PatchStatus,
    Delete,
    RemoveFinalizer,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Load => "load template",
            Self::AddFinalizer => "add finalizer to template",
            Self::Create => "create template",
            Self::Get => "get template",
            Self::RecordId => "record template id",
            Self::Update => "update template",
            Self::AdoptData => "adopt template data",
            Self::PatchStatus => "patch template status",
            Self::Delete => "delete template",
            Self::RemoveFinalizer => "remove finalizer from template",
        };
        f.write_str(phase)
    }
}

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to {phase}: {source}")]
    Store { phase: Phase, source: StoreError },

    #[error("failed to {phase} in backend: {source}")]
    Backend { phase: Phase, source: BackendError },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Wrap a store failure with the phase it happened in.
    pub const fn store(phase: Phase, source: StoreError) -> Self {
        Self::Store { phase, source }
    }

    /// Wrap a backend failure with the phase it happened in.
    pub const fn backend(phase: Phase, source: BackendError) -> Self {
        Self::Backend { phase, source }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Phase of the run that failed, if the error came from a collaborator.
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Store { phase, .. } | Self::Backend { phase, .. } => Some(*phase),
            Self::InvalidConfig { .. } => None,
        }
    }

    /// Whether the run lost a compare-and-patch race.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_conflict())
    }
}
