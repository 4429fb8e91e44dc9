//! Contracts, contexts and allocations

use crate::criteria::{self, Criteria};
use crate::error::Result;
use crate::expression::{ExpressionCache, ExpressionParams};
use crate::labels::LabelOperations;
use crate::policy::Metadata;
use crate::template::TemplateCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named interface, fulfilled by the first context whose criteria match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Label changes applied whenever the contract is being resolved
    #[serde(default)]
    pub change_labels: LabelOperations,

    /// Contexts, evaluated in declared order
    #[serde(default)]
    pub contexts: Vec<Context>,
}

/// A single context within a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    /// Label changes applied when this context gets matched
    #[serde(default)]
    pub change_labels: LabelOperations,

    pub allocation: Option<Allocation>,
}

/// Which service a context allocates and which keys make the instance unique
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Service locator, `name` or `namespace/name`
    pub service: String,

    /// Key templates; different resolved values produce different instances
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Contract {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            change_labels: LabelOperations::default(),
            contexts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.contexts.push(context);
        self
    }
}

impl Context {
    pub fn new(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            criteria: None,
            change_labels: LabelOperations::default(),
            allocation: Some(Allocation {
                service: service.into(),
                keys: Vec::new(),
            }),
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        if let Some(allocation) = self.allocation.as_mut() {
            allocation.keys = keys.iter().map(|k| k.to_string()).collect();
        }
        self
    }

    pub fn with_change_labels(mut self, ops: LabelOperations) -> Self {
        self.change_labels = ops;
        self
    }

    /// Checks whether the context criteria are satisfied
    pub fn matches(&self, params: &ExpressionParams, cache: &ExpressionCache) -> Result<bool> {
        criteria::matches(self.criteria.as_ref(), params, cache)
    }

    /// Resolves dynamic allocation keys
    pub fn resolve_keys(&self, data: &Value, cache: &TemplateCache) -> Result<Vec<String>> {
        let Some(allocation) = &self.allocation else {
            return Ok(Vec::new());
        };
        allocation
            .keys
            .iter()
            .map(|key| cache.evaluate(key, data))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_keys() {
        let context = Context::new("prod", "web").with_keys(&["{{ .User.Labels.team }}", "fixed"]);
        let data = json!({"User": {"Labels": {"team": "platform"}}});
        let keys = context.resolve_keys(&data, &TemplateCache::new()).unwrap();
        assert_eq!(keys, vec!["platform", "fixed"]);
    }

    #[test]
    fn test_resolve_keys_missing_value() {
        let context = Context::new("prod", "web").with_keys(&["{{ .User.Labels.team }}"]);
        assert!(context
            .resolve_keys(&json!({}), &TemplateCache::new())
            .is_err());
    }

    #[test]
    fn test_context_without_criteria_matches() {
        let context = Context::new("any", "web");
        assert!(context
            .matches(&ExpressionParams::default(), &ExpressionCache::new())
            .unwrap());
    }
}
