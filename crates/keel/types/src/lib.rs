//! KEEL Types - Policy language model for the reconciliation engine
//!
//! KEEL turns a declarative policy (services, contracts, clusters, rules and
//! user claims) into a desired deployment state, diffs it against the actual
//! state and drives plugins until the two match.
//!
//! ## Architectural Boundaries
//!
//! - `keel-types` owns: policy objects, labels, criteria, expressions, templates, event log
//! - `keel-resolve` owns: component instance keys, policy resolution
//! - `keel-plugin` owns: plugin contracts and the plugin registry
//! - `keel-apply` owns: state diff, action graph, concurrent execution
//!
//! ## Key Concepts
//!
//! - **Service**: an ordered set of components, each either code or a contract reference
//! - **Contract**: a named interface fulfilled by the first matching context
//! - **Rule**: weighted criteria plus label mutations, claim rejection and stop
//! - **Claim**: "user U wants contract C with labels L"
//! - **Criteria**: require-all / require-any / require-none expression clauses

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod acl;
pub mod claim;
pub mod cluster;
pub mod contract;
pub mod criteria;
pub mod error;
pub mod event;
pub mod expression;
pub mod labels;
pub mod params;
pub mod policy;
pub mod rule;
pub mod service;
pub mod template;
pub mod validation;

// Re-exports
pub use acl::{AclResolver, AclRole, Privilege};
pub use claim::{Claim, User};
pub use cluster::{Cluster, Target};
pub use contract::{Allocation, Context, Contract};
pub use criteria::Criteria;
pub use error::{PolicyError, Result, ValidationError};
pub use event::{EventEntry, EventLog, EventSeverity};
pub use expression::{Expression, ExpressionCache, ExpressionParams};
pub use labels::{LabelOperations, LabelSet};
pub use params::NestedParameterMap;
pub use policy::{Metadata, Policy, PolicyNamespace, SYSTEM_NS};
pub use rule::{ClaimAction, Rule, RuleActionResult, RuleActions};
pub use service::{Code, Component, Service, ROOT_COMPONENT};
pub use template::{Template, TemplateCache};
