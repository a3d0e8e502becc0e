//! Error types for the ambassador-shim controller

use thiserror::Error;

/// Main error type for ambassador-shim operations
///
/// A missing Mapping or Service is not an error: the store reports absence as
/// `Ok(None)` and the reconciler handles it locally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (network, server, permission)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Concurrent modification or create race on an object
    #[error("conflict on {kind} {namespace}/{name}")]
    Conflict {
        /// Resource kind (e.g. "Service")
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// Serialization of the legacy Ambassador configuration failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The Mapping is missing identity fields required to derive its Service
    #[error("validation error: {0}")]
    Validation(String),

    /// The reconcile cycle was aborted by shutdown
    #[error("reconcile cancelled")]
    Cancelled,
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a conflict error for the given object
    pub fn conflict(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec fix before a retry can
    /// succeed. Everything else is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(_) | Error::Conflict { .. } | Error::Cancelled => true,
            Error::Serialization(_) | Error::Validation(_) => false,
        }
    }

    /// Returns true for optimistic-concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
