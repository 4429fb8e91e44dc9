//! Policy error types

use thiserror::Error;

/// Errors raised while reading or evaluating policy objects
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PolicyError {
    #[error("unable to compile expression '{expression}': {reason}")]
    ExpressionCompile { expression: String, reason: String },

    #[error("unable to evaluate expression '{expression}': {reason}")]
    ExpressionEvaluation { expression: String, reason: String },

    #[error("unable to compile template '{template}': {reason}")]
    TemplateCompile { template: String, reason: String },

    #[error("unable to evaluate template '{template}': {reason}")]
    TemplateEvaluation { template: String, reason: String },

    #[error("can't evaluate '{clause}' in criteria: {source}")]
    Criteria {
        clause: &'static str,
        #[source]
        source: Box<PolicyError>,
    },

    #[error("deployment target '{0}' must not contain '#'")]
    InvalidTarget(String),

    #[error("can't parse policy object locator: '{0}'")]
    InvalidLocator(String),

    #[error("namespace '{namespace}' doesn't exist, but referenced in locator '{locator}'")]
    NamespaceNotFound { namespace: String, locator: String },

    #[error("cluster '{cluster}' can only be added into the system namespace, not '{namespace}'")]
    ClusterOutsideSystemNamespace { cluster: String, namespace: String },

    #[error("policy validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// Structural problems found by [`crate::Policy::validate`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} name '{name}' is not a valid identifier")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("service '{service}' declares component '{component}' more than once")]
    DuplicateComponent { service: String, component: String },

    #[error("component '{component}' of service '{service}' must have either code or contract, but not both")]
    ComponentKind { service: String, component: String },

    #[error("service '{service}' has a dependency on non-existing component '{dependency}'")]
    MissingDependency { service: String, dependency: String },

    #[error("component cycle detected while processing service '{service}' component '{component}'")]
    ComponentCycle { service: String, component: String },

    #[error("component name '{component}' of service '{service}' is reserved")]
    ReservedComponentName { service: String, component: String },

    #[error("cluster '{cluster}' must be in the system namespace, not '{namespace}'")]
    ClusterNamespace { cluster: String, namespace: String },

    #[error("context '{context}' of contract '{contract}' has no allocation")]
    MissingAllocation { contract: String, context: String },

    #[error("rule '{rule}' has negative weight {weight}")]
    NegativeWeight { rule: String, weight: i64 },

    #[error("{0}")]
    Expression(String),

    #[error("{0}")]
    Template(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
