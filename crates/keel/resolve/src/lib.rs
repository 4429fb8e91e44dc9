//! KEEL Resolve - Policy resolution into component instances
//!
//! Walks every claim declared in a policy and computes which component
//! instances must exist, with which labels, discovery and code parameters.
//! The result is a [`PolicyResolution`], the desired state that gets diffed
//! against the actual state.
//!
//! ## Architectural Boundaries
//!
//! - `keel-resolve` owns: instance keys, component instances, the resolution container, the resolver
//! - `keel-resolve` does NOT own: diffing and applying actions (see `keel-apply`)
//!
//! ## Key Concepts
//!
//! - **ComponentInstanceKey**: deterministic identity of one resolved instance
//! - **PolicyResolution**: instance map, claim status map and processing order
//! - **PolicyResolver**: resolves claims in parallel on a bounded worker pool
//! - **ExternalData**: user and secret loaders the resolver consults

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod config;
pub mod error;
pub mod external;
pub mod instance;
pub mod key;
mod node;
pub mod resolution;
pub mod resolver;

// Re-exports
pub use builder::PolicyBuilder;
pub use config::ResolverConfig;
pub use error::{ResolveError, Result};
pub use external::{
    ExternalData, InMemorySecretLoader, InMemoryUserLoader, SecretLoader, UserLoader,
};
pub use instance::ComponentInstance;
pub use key::{ComponentInstanceKey, ROOT_COMPONENT, UNRESOLVED};
pub use node::TARGET_LABEL;
pub use resolution::{ClaimResolution, PolicyResolution};
pub use resolver::PolicyResolver;
