//! Resolution error types

use keel_types::{PolicyError, ValidationError};
use thiserror::Error;

/// Errors that make a single claim unresolvable.
///
/// None of these abort the whole resolution; they are recorded against the
/// claim that hit them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("user '{0}' does not exist")]
    UserNotFound(String),

    #[error("contract '{0}' does not exist")]
    ContractNotFound(String),

    #[error("service '{0}' does not exist")]
    ServiceNotFound(String),

    #[error("unable to find matching context within contract '{0}'")]
    ContextNotMatched(String),

    #[error("context '{context}' of contract '{contract}' has no allocation")]
    NoAllocation { contract: String, context: String },

    #[error("service '{service}' is not in the same namespace as contract '{contract}'")]
    ServiceNamespaceMismatch { service: String, contract: String },

    #[error("user '{user}' is not allowed to consume service '{service}'")]
    ConsumeDenied { user: String, service: String },

    #[error("rules do not allow claim '{0}' to be fulfilled")]
    RejectedByRules(String),

    #[error("deployment target is not set (label 'target')")]
    TargetNotSet,

    #[error("cluster '{0}' does not exist")]
    ClusterNotFound(String),

    #[error("service cycle detected: {}", .0.join(" -> "))]
    ServiceCycle(Vec<String>),

    #[error("conflicting code parameters for component instance '{0}'")]
    ConflictingCodeParams(String),

    #[error("conflicting discovery parameters for component instance '{0}'")]
    ConflictingDiscoveryParams(String),

    #[error("panic while resolving claim: {0}")]
    Panic(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;
