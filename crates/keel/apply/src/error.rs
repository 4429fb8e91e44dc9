//! Apply error types

use keel_plugin::PluginError;
use thiserror::Error;

/// Errors raised while executing a single action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("component instance '{0}' not found in desired state")]
    NotDesired(String),

    #[error("component instance '{0}' not found in actual state")]
    NotFound(String),

    #[error("component instance '{0}' already exists in actual state")]
    AlreadyExists(String),

    #[error("component instance '{0}' is not backed by code")]
    NotCode(String),

    #[error("cluster '{cluster}' of component instance '{key}' not found")]
    ClusterNotFound { key: String, cluster: String },

    #[error("cluster '{cluster}' failed validation: {reason}")]
    ClusterInvalid { cluster: String, reason: String },

    #[error("panic while executing action: {0}")]
    Panic(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Result type for apply operations
pub type Result<T> = std::result::Result<T, ApplyError>;
