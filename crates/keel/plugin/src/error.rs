//! Plugin error types

use thiserror::Error;

/// Errors raised by plugins and the plugin registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("cluster type '{cluster_type}' is not supported (cluster '{cluster}')")]
    ClusterTypeNotSupported { cluster: String, cluster_type: String },

    #[error("code type '{code_type}' is not supported on cluster '{cluster}'")]
    CodeTypeNotSupported { cluster: String, code_type: String },

    #[error("{operation} failed for '{deploy_name}': {reason}")]
    Operation {
        operation: &'static str,
        deploy_name: String,
        reason: String,
    },

    #[error("post-processing failed: {0}")]
    PostProcess(String),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;
