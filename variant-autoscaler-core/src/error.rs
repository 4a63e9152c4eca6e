//! Error types for the decision core.

use thiserror::Error;

/// Result type used throughout the decision core.
pub type Result<T> = std::result::Result<T, AutoscalerError>;

/// Errors raised by the metrics source, collector, analyzer, engine, and
/// reconciler.
#[derive(Error, Debug)]
pub enum AutoscalerError {
    /// The metrics time-series back-end could not be reached or returned a
    /// server error. The loop treats this as a per-group failure and falls
    /// back to safety-net emission; it does not abort other groups.
    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An I/O operation (query, object-store call) did not complete within
    /// its budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A query result or configuration document could not be parsed.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A requested object-store resource (variant, deployment) does not
    /// exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A configuration entry failed validation.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A status patch conflicted with a concurrent writer; the reconcile
    /// should retry with a fresh read.
    #[error("patch conflict: {0}")]
    PatchConflict(String),

    /// Serialization failure at a crate boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else unexpected; the reconcile fails and requeues.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AutoscalerError {
    /// Whether this error should trigger safety-net emission for an entire
    /// group rather than an individual variant's reconcile failing.
    pub fn is_group_level(&self) -> bool {
        matches!(
            self,
            AutoscalerError::BackendUnavailable(_) | AutoscalerError::Timeout(_)
        )
    }

    /// Whether an object-store call that failed with this error is worth
    /// retrying (see [`crate::retry::with_backoff`]). `Timeout` and
    /// `PatchConflict` are transient by nature; everything else — `NotFound`
    /// in particular — would fail identically on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AutoscalerError::Timeout(_) | AutoscalerError::PatchConflict(_)
        )
    }

    /// A short machine-readable code, used as `VariantDecision::metrics_reason`
    /// and as the status-condition reason on the variant object.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AutoscalerError::BackendUnavailable(_) => "BackendUnavailable",
            AutoscalerError::Timeout(_) => "Timeout",
            AutoscalerError::ParseError(_) => "ParseError",
            AutoscalerError::NotFound(_) => "NotFound",
            AutoscalerError::ConfigInvalid(_) => "ConfigInvalid",
            AutoscalerError::PatchConflict(_) => "PatchConflict",
            AutoscalerError::Serialization(_) => "Internal",
            AutoscalerError::Internal(_) => "Internal",
        }
    }
}
