//! Error taxonomy for apply operations
//!
//! Every failure surfaced by the applier falls into one of these kinds so
//! callers (and the CLI) can react without string matching.

use thiserror::Error;

/// Failure kinds for an apply operation
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The input was rejected locally before any network call, or the
    /// control plane rejected the object itself (4xx other than auth/409).
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// The control plane did not respond: connection failure, timeout,
    /// or a 5xx. This is the only retryable kind.
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// The control plane rejected the credential (401/403).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The object exists but is not managed by this tool. Never overwritten.
    #[error("conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// An optimistic-concurrency race on update, surfaced after one
    /// internal read-compare-update retry.
    #[error("resource version conflict on {0}")]
    VersionConflict(String),
}

impl ApplyError {
    /// Stable taxonomy name, used in CLI error output.
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::Validation { .. } => "ValidationError",
            ApplyError::ClusterUnreachable(_) => "ClusterUnreachable",
            ApplyError::PermissionDenied(_) => "PermissionDenied",
            ApplyError::Conflict { .. } => "Conflict",
            ApplyError::VersionConflict(_) => "VersionConflict",
        }
    }

    /// Whether the failure may be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::ClusterUnreachable(_))
    }

    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApplyError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
