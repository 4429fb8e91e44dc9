//! KEEL Apply - Diffing resolved states and driving plugins
//!
//! Compares a desired [`PolicyResolution`](keel_resolve::PolicyResolution)
//! with the actual one, turns the differences into a dependency graph of
//! actions and executes that graph with bounded concurrency.
//!
//! ## Architectural Boundaries
//!
//! - `keel-apply` owns: actions, the diff engine, the action plan and its executor,
//!   actual state updates, the reconcile pipeline
//! - `keel-apply` does NOT own: resolution (see `keel-resolve`), infrastructure
//!   adapters (see `keel-plugin`), persistence of the actual state
//!
//! ## Key Concepts
//!
//! - **Action**: create, update, delete, attach/detach claim or fetch endpoints for one key
//! - **Plan**: per-key graph nodes with ordered actions and `before` edges
//! - **ApplyResult**: success/failed/skipped/total counters of one apply run
//! - **ActualStateUpdater**: where actions record what now exists
//! - **Reconciler**: resolve, diff and apply in one call

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod config;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod plan;
pub mod reconcile;
pub mod result;
pub mod state;

// Re-exports
pub use action::Action;
pub use config::{ApplyConfig, EngineConfig};
pub use context::ActionContext;
pub use diff::diff;
pub use engine::ApplyEngine;
pub use error::{ApplyError, Result};
pub use plan::{
    noop, wrap_parallel_with_limit, wrap_sequential, ApplyFunction, GraphNode, Plan,
};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use result::{ApplyResult, ApplyResultUpdater};
pub use state::{ActualStateUpdater, InMemoryActualState, InstanceUpdate};
