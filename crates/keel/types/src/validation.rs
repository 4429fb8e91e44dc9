//! Structural policy validation
//!
//! The resolver assumes a valid policy; call [`Policy::validate`] before
//! handing a policy to it.

use crate::criteria::Criteria;
use crate::error::{PolicyError, Result, ValidationError};
use crate::expression::Expression;
use crate::params::NestedParameterMap;
use crate::policy::{Policy, SYSTEM_NS};
use crate::rule::Rule;
use crate::service::ROOT_COMPONENT;
use crate::template::Template;
use serde_json::Value;
use std::collections::HashSet;

/// Returns true for names like `web`, `db-primary`, `team_a.v2`
pub fn is_identifier(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_alphanumeric();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) => {
            edge_ok(first)
                && edge_ok(last)
                && bytes
                    .iter()
                    .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        }
        _ => false,
    }
}

impl Policy {
    /// Validates the policy and returns every problem found
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        for service in self.services() {
            check_identifier(&mut errors, "service", service.name());

            let mut seen = HashSet::new();
            for component in &service.components {
                check_identifier(&mut errors, "component", &component.name);
                if component.name == ROOT_COMPONENT {
                    errors.push(ValidationError::ReservedComponentName {
                        service: service.name().to_string(),
                        component: component.name.clone(),
                    });
                }
                if !seen.insert(component.name.as_str()) {
                    errors.push(ValidationError::DuplicateComponent {
                        service: service.name().to_string(),
                        component: component.name.clone(),
                    });
                }
                if component.code.is_some() == component.contract.is_some() {
                    errors.push(ValidationError::ComponentKind {
                        service: service.name().to_string(),
                        component: component.name.clone(),
                    });
                }
                check_criteria(&mut errors, component.criteria.as_ref());
                check_templates(&mut errors, &component.discovery);
                if let Some(code) = &component.code {
                    check_templates(&mut errors, &code.params);
                }
            }

            if let Err(e) = service.components_sorted() {
                errors.push(e);
            }
        }

        for contract in self.contracts() {
            check_identifier(&mut errors, "contract", contract.name());
            for context in &contract.contexts {
                check_identifier(&mut errors, "context", &context.name);
                check_criteria(&mut errors, context.criteria.as_ref());
                match &context.allocation {
                    Some(allocation) => {
                        for key in &allocation.keys {
                            check_template(&mut errors, key);
                        }
                    }
                    None => errors.push(ValidationError::MissingAllocation {
                        contract: contract.name().to_string(),
                        context: context.name.clone(),
                    }),
                }
            }
        }

        for ns in self.namespaces.values() {
            for cluster in ns.clusters.values() {
                check_identifier(&mut errors, "cluster", cluster.name());
                if cluster.namespace() != SYSTEM_NS || ns.name != SYSTEM_NS {
                    errors.push(ValidationError::ClusterNamespace {
                        cluster: cluster.name().to_string(),
                        namespace: if ns.name != SYSTEM_NS {
                            ns.name.clone()
                        } else {
                            cluster.namespace().to_string()
                        },
                    });
                }
            }
            for rule in ns.rules.iter().chain(ns.acl_rules.iter()) {
                check_rule(&mut errors, rule);
            }
            for claim in &ns.claims {
                check_identifier(&mut errors, "claim", &claim.metadata.name);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Validation(errors))
        }
    }
}

fn check_identifier(errors: &mut Vec<ValidationError>, kind: &'static str, name: &str) {
    if !is_identifier(name) {
        errors.push(ValidationError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        });
    }
}

fn check_rule(errors: &mut Vec<ValidationError>, rule: &Rule) {
    check_identifier(errors, "rule", rule.name());
    if rule.weight < 0 {
        errors.push(ValidationError::NegativeWeight {
            rule: rule.name().to_string(),
            weight: rule.weight,
        });
    }
    check_criteria(errors, rule.criteria.as_ref());
}

fn check_criteria(errors: &mut Vec<ValidationError>, criteria: Option<&Criteria>) {
    let Some(criteria) = criteria else {
        return;
    };
    for expr in criteria.expressions() {
        if let Err(e) = Expression::compile(expr) {
            errors.push(ValidationError::Expression(e.to_string()));
        }
    }
}

fn check_template(errors: &mut Vec<ValidationError>, source: &str) {
    if let Err(e) = Template::compile(source) {
        errors.push(ValidationError::Template(e.to_string()));
    }
}

fn check_templates(errors: &mut Vec<ValidationError>, params: &NestedParameterMap) {
    for value in params.values() {
        match value {
            Value::String(s) => check_template(errors, s),
            Value::Object(inner) => check_templates(errors, inner),
            _ => {}
        }
    }
}
