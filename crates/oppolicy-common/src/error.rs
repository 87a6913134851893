//! Error types for the operator policy controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the context a reader needs to find the failing
//! object: the policy, the dependency kind, or the call site.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator policy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The policy spec is invalid
    #[error("validation error for {policy}: {message}")]
    Validation {
        /// Namespaced name of the policy with the invalid spec
        policy: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being converted (if known)
        kind: Option<String>,
    },

    /// The API server rejected a write as forbidden, usually because it
    /// would change an immutable field
    #[error("update of {kind} {name} is forbidden: {message}")]
    Forbidden {
        /// Kind of the object that could not be written
        kind: String,
        /// Name of the object that could not be written
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// Dependency watcher bookkeeping error
    #[error("watcher error for {watcher}: {message}")]
    Watcher {
        /// Identifier of the policy owning the watch
        watcher: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "subscription", "install-plan")
        context: String,
    },

    /// Several independent failures collected from one reconciliation run
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            policy: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with policy context
    pub fn validation_for(policy: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            policy: policy.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a forbidden-write error
    pub fn forbidden(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Forbidden {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a watcher error
    pub fn watcher(watcher: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Watcher {
            watcher: watcher.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Collapse a list of errors into one.
    ///
    /// Returns `None` when the list is empty and the single error unchanged
    /// when there is only one.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Whether the API server rejected a write as forbidden
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::Forbidden { .. })
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    /// Kubernetes errors depend on the status code. An aggregate is retryable
    /// if any of its members is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Conflicts are resolved by re-reading on the next run
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Forbidden { .. } => false,
            Error::Watcher { .. } => true,
            Error::Internal { .. } => true,
            Error::Aggregate(errors) => errors.iter().any(Error::is_retryable),
        }
    }
}
