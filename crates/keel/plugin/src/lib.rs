//! KEEL Plugin - Contracts between the engine and infrastructure adapters
//!
//! The engine never touches infrastructure directly. Actions call code
//! plugins to create, update and destroy component instances; post-process
//! plugins run once per apply cycle.
//!
//! ## Architectural Boundaries
//!
//! - `keel-plugin` owns: plugin traits, the plugin registry, fake plugins for tests
//! - `keel-plugin` does NOT own: concrete Kubernetes/Helm adapters
//!
//! ## Key Concepts
//!
//! - **ClusterPlugin**: validates and cleans up a cluster
//! - **CodePlugin**: deploys code of one type onto a cluster
//! - **PostProcessPlugin**: runs after the action graph drains
//! - **PluginRegistry**: maps clusters and code types to cached plugin instances

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod fake;
pub mod plugin;
pub mod registry;

// Re-exports
pub use error::{PluginError, Result};
pub use fake::{FailCodePlugin, FakeRegistry, NoopClusterPlugin, NoopCodePlugin, RecordingPostProcess};
pub use plugin::{ClusterPlugin, CodeInvocation, CodePlugin, Endpoints, PostProcessPlugin};
pub use registry::{DefaultPluginRegistry, PluginRegistry};
