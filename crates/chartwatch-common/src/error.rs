//! Error types for chartwatch
//!
//! Every variant names the resource it concerns so failures collected at
//! session end can be traced back to the release or namespace that caused
//! them. Kubernetes API failures are classified by status code through
//! [`Error::from_kube`].

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific resource is known
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for chartwatch operations
#[derive(Debug, Error)]
pub enum Error {
    /// Connection or IO failure talking to the cluster
    #[error("transport error [{context}]: {message}")]
    Transport {
        /// Resource or operation being attempted
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The target resource does not exist
    #[error("{resource} not found")]
    NotFound {
        /// Resource identity (e.g. "HelmRelease cattle-gatekeeper-system/rancher-gatekeeper")
        resource: String,
    },

    /// A create collided with an existing resource
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Resource identity
        resource: String,
    },

    /// The submitted desired state was rejected as malformed
    #[error("invalid spec for {resource}: {message}")]
    InvalidSpec {
        /// Resource identity
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Domain-level rejection: a predicate failure or an admission denial
    #[error("{resource} rejected: {message}")]
    Predicate {
        /// Resource identity
        resource: String,
        /// Rejection reason
        message: String,
    },

    /// The watch stream delivered a server-reported error event
    #[error("watch on {resource} reported error {code}: {message}")]
    Watch {
        /// Resource identity
        resource: String,
        /// HTTP-style status code reported by the server
        code: u16,
        /// Server message
        message: String,
    },

    /// The watch stream ended without a terminal event and before the budget
    #[error("watch on {resource} closed before a terminal event")]
    StreamClosed {
        /// Resource identity
        resource: String,
    },

    /// No terminal decision within the wait budget
    #[error("timed out after {budget:?} waiting on {resource}")]
    Timeout {
        /// Resource identity
        resource: String,
        /// Budget that elapsed
        budget: Duration,
    },

    /// A lifecycle operation was requested from a state that does not allow it
    #[error("cannot {operation} {resource} while {state}")]
    InvalidTransition {
        /// Resource identity
        resource: String,
        /// Requested operation (install, upgrade, uninstall)
        operation: String,
        /// Current lifecycle state
        state: String,
    },

    /// A loosely-typed document could not be projected into a typed record
    #[error("decode error at {field}: {message}")]
    Decode {
        /// JSON path of the offending field (e.g. "items[0].status.totalViolations")
        field: String,
        /// Description of the mismatch
        message: String,
    },

    /// One or more cleanup actions failed; every failure is listed
    #[error("{} cleanup action(s) failed: {}", .failures.len(), join_failures(.failures))]
    Cleanup {
        /// Failed actions in execution order
        failures: Vec<CleanupFailure>,
    },

    /// Invalid harness configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },
}

/// A single failed cleanup action
#[derive(Debug)]
pub struct CleanupFailure {
    /// Description the action was registered with
    pub action: String,
    /// Error the action returned
    pub error: Error,
}

fn join_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.action, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(resource: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Create an invalid-spec error
    pub fn invalid_spec(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSpec {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a predicate (domain rejection) error
    pub fn predicate(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Predicate {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error for a field path
    pub fn decode(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Decode {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Classify a kube-rs error for the given resource.
    ///
    /// 404 maps to [`Error::NotFound`], 409 to [`Error::AlreadyExists`],
    /// 400/422 to [`Error::InvalidSpec`], admission webhook denials to
    /// [`Error::Predicate`]. Everything else is a transport failure.
    pub fn from_kube(err: kube::Error, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        match err {
            kube::Error::Api(ae) => match ae.code {
                404 => Self::NotFound { resource },
                409 => Self::AlreadyExists { resource },
                400 | 422 => Self::InvalidSpec {
                    resource,
                    message: ae.message,
                },
                _ if ae.message.contains("admission webhook") => Self::Predicate {
                    resource,
                    message: ae.message,
                },
                _ => Self::Transport {
                    context: resource,
                    message: ae.message,
                },
            },
            other => Self::Transport {
                context: resource,
                message: other.to_string(),
            },
        }
    }

    /// Whether this error indicates the target is already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error is retryable
    ///
    /// Only transient conditions are retryable: transport failures, streams
    /// that closed early, and timeouts. Domain rejections and malformed
    /// specs need a changed input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::StreamClosed { .. } | Error::Timeout { .. } => true,
            Error::NotFound { .. }
            | Error::AlreadyExists { .. }
            | Error::InvalidSpec { .. }
            | Error::Predicate { .. }
            | Error::Watch { .. }
            | Error::InvalidTransition { .. }
            | Error::Decode { .. }
            | Error::Cleanup { .. }
            | Error::Config { .. } => false,
        }
    }

    /// Get the resource this error concerns, if any
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Transport { context, .. } => Some(context),
            Error::NotFound { resource }
            | Error::AlreadyExists { resource }
            | Error::InvalidSpec { resource, .. }
            | Error::Predicate { resource, .. }
            | Error::Watch { resource, .. }
            | Error::StreamClosed { resource }
            | Error::Timeout { resource, .. }
            | Error::InvalidTransition { resource, .. } => Some(resource),
            Error::Decode { .. } | Error::Cleanup { .. } | Error::Config { .. } => None,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::from_kube(err, UNKNOWN_CONTEXT)
    }
}
