//! Error types for the quota accounting core
//!
//! Reads never swallow errors that would produce a wrong numeric answer:
//! they either return a correct value or propagate one of these kinds.
//! Event-handler write failures are logged and swallowed at the sink
//! instead, since an under-count is bounded by the staleness deadline.

/// Errors surfaced to callers of the usage façade
#[derive(thiserror::Error, Debug)]
pub enum QuotaError {
    #[error("organization '{0}' not found")]
    OrganizationNotFound(String),

    #[error("organization id mismatch: expected '{expected}', got '{actual}'")]
    OrganizationMismatch { expected: String, actual: String },

    #[error("timed out waiting for lock '{0}'")]
    LockTimeout(String),

    #[error("usage source error: {0}")]
    Source(#[from] anyhow::Error),
}

impl QuotaError {
    /// Whether the error is a lock-acquisition timeout, the one kind a
    /// caller may want to retry or bypass
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, QuotaError::LockTimeout(_))
    }
}
