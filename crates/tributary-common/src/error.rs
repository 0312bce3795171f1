//! Error types for the Tributary controller
//!
//! Errors are structured with fields to aid debugging in production. Verdict
//! errors (sink not resolvable, permissions denied, workload not owned) carry
//! the same message that lands in the matching status condition, so the
//! scheduler's retry and the user-facing condition never disagree.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Tributary operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The referenced sink object does not exist
    #[error("sink not found: {reference}")]
    SinkNotFound {
        /// Human-readable reference, e.g. `Broker eventing.knative.dev/v1 ns/name`
        reference: String,
    },

    /// The referenced sink object exists but exposes no address yet
    #[error("sink not ready: {reference} does not expose an address")]
    SinkNotReady {
        /// Human-readable reference to the sink object
        reference: String,
    },

    /// The destination cannot be turned into an absolute URI
    #[error("invalid sink: {message}")]
    InvalidSink {
        /// Description of what's invalid
        message: String,
    },

    /// The acting identity may not watch one or more requested resources
    #[error("{message}")]
    PermissionDenied {
        /// Full denial message, as surfaced on the PermissionsGranted condition
        message: String,
    },

    /// A workload with the derived name exists but belongs to someone else
    #[error("deployment {namespace}/{name} is not controlled by this source")]
    WorkloadNotOwned {
        /// Namespace of the conflicting Deployment
        namespace: String,
        /// Name of the conflicting Deployment
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "sink")
        context: String,
    },
}

impl Error {
    /// Create a sink-not-found error for the given reference description
    pub fn sink_not_found(reference: impl Into<String>) -> Self {
        Self::SinkNotFound {
            reference: reference.into(),
        }
    }

    /// Create a sink-not-ready error for the given reference description
    pub fn sink_not_ready(reference: impl Into<String>) -> Self {
        Self::SinkNotReady {
            reference: reference.into(),
        }
    }

    /// Create an invalid-sink error
    pub fn invalid_sink(msg: impl Into<String>) -> Self {
        Self::InvalidSink {
            message: msg.into(),
        }
    }

    /// Create a permission-denied error carrying the full denial message
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }

    /// Create a not-owned error for a conflicting Deployment
    pub fn workload_not_owned(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::WorkloadNotOwned {
            namespace: namespace.into(),
            name: name.into(),
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

    /// Check if this error is retryable
    ///
    /// Everything that depends on cluster state is retryable: permissions,
    /// sink readiness and workload health can all change out-of-band, and an
    /// optimistic-concurrency conflict (409) clears on the next pass.
    /// Serialization errors are code bugs and are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Serialization { .. })
    }

    /// Whether this error is a status write rejected by optimistic concurrency
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 409
        )
    }

    /// Condition reason for errors that are verdicts rather than failures
    ///
    /// Returns `None` for transport and internal errors, which never produce
    /// a condition value of their own.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Error::SinkNotFound { .. } => Some("SinkNotFound"),
            Error::SinkNotReady { .. } => Some("SinkNotReady"),
            Error::InvalidSink { .. } => Some("InvalidSink"),
            Error::PermissionDenied { .. } => Some("NoSufficientPermissions"),
            Error::WorkloadNotOwned { .. } => Some("DeploymentNotOwned"),
            _ => None,
        }
    }

    /// Label for the reconcile error counter
    ///
    /// Verdict errors use their condition reason; the rest are grouped by kind.
    pub fn metric_reason(&self) -> &'static str {
        match self {
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
            Error::Kube { .. } => "transport",
            _ => self.reason().unwrap_or("transport"),
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
