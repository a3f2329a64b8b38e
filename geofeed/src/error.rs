//! Error taxonomy shared by every cache and fetch path.
//!
//! Errors are `Clone` because a coalesced fetch hands the same outcome to
//! every caller that joined it. Each variant maps onto one [`ErrorKind`],
//! which drives retry decisions and what the caller is expected to show.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type for fetch and cache operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested item does not exist. Terminal, never retried.
    NotFound,
    /// Timeout or connectivity loss. Eligible for retry with backoff.
    Transient,
    /// The remote store refused access. Terminal, never retried.
    PermissionDenied,
    /// Unexpected payload shape. Terminal for the affected entry only.
    Malformed,
    /// Every interested caller went away before the fetch finished.
    Cancelled,
}

/// Errors returned by remote fetches and cache lookups.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Requested ID, document or blob does not exist.
    #[error("Not found: {what}")]
    NotFound { what: Arc<str> },

    /// Network failure that may succeed on retry.
    #[error("Transient failure: {reason}")]
    Transient { reason: Arc<str> },

    /// The remote call did not finish within its deadline.
    #[error("Timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// Access was refused by the remote store.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: Arc<str> },

    /// A payload could not be interpreted.
    #[error("Malformed entry {id}: {reason}")]
    Malformed { id: Arc<str>, reason: Arc<str> },

    /// The fetch was cancelled because no caller was waiting for it.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Builds a [`FetchError::NotFound`].
    pub fn not_found(what: impl Into<Arc<str>>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Builds a [`FetchError::Transient`].
    pub fn transient(reason: impl Into<Arc<str>>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Builds a [`FetchError::PermissionDenied`].
    pub fn permission_denied(reason: impl Into<Arc<str>>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Builds a [`FetchError::Malformed`].
    pub fn malformed(id: impl Into<Arc<str>>, reason: impl Into<Arc<str>>) -> Self {
        Self::Malformed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transient { .. } | Self::Timeout { .. } => ErrorKind::Transient,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true for [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::not_found(e.to_string()),
            std::io::ErrorKind::PermissionDenied => FetchError::permission_denied(e.to_string()),
            std::io::ErrorKind::InvalidData => FetchError::malformed("io", e.to_string()),
            _ => FetchError::transient(e.to_string()),
        }
    }
}
