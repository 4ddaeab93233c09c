//! Core types for the reconciler.

use crate::error::Error;

/// Result of one reconcile run for a key.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The record is converged: its backend object matches and it is Ready,
    /// or its deletion was completed.
    Converged,
    /// The run failed; the key should be delivered again later.
    Requeue(Error),
    /// No record exists for the key; nothing to do.
    NotFound,
}

impl ReconcileOutcome {
    /// Whether the run left the record converged.
    pub const fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    /// Whether the key needs another delivery.
    pub const fn is_requeue(&self) -> bool {
        matches!(self, Self::Requeue(_))
    }

    /// The error that caused a requeue.
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Requeue(error) => Some(error),
            Self::Converged | Self::NotFound => None,
        }
    }

    /// Short label for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::Requeue(_) => "requeue-after-error",
            Self::NotFound => "no-op-not-found",
        }
    }
}
