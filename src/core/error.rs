//! Error types for cache, pool and scheduler operations.

use thiserror::Error;

/// Errors produced by the load cache and object pool.
///
/// Every variant carries owned data only so a single failure can be cloned
/// and handed to each consumer waiting on the same load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backend reported that a load did not succeed.
    #[error("load `{key}` failed: {reason}")]
    LoadFailed {
        /// Resource key that was requested.
        key: String,
        /// Backend-provided reason.
        reason: String,
    },
    /// A cached ticket holds a payload of a different shape than requested
    /// (single asset vs. asset list).
    #[error("load `{key}` is cached with a different payload kind")]
    PayloadMismatch {
        /// Resource key that was requested.
        key: String,
    },
    /// A template was registered under a key that already has a record.
    #[error("duplicate template: {0}")]
    DuplicateTemplate(String),
    /// The placement host could not create an instance from a template.
    #[error("instantiate `{key}` failed: {reason}")]
    Instantiate {
        /// Template key.
        key: String,
        /// Host-provided reason.
        reason: String,
    },
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Build a [`CacheError::LoadFailed`] for `key`.
    pub fn load_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Timer tasks return this so any error type can surface through the
/// scheduler's logging wrapper.
pub type AppResult<T> = Result<T, anyhow::Error>;
