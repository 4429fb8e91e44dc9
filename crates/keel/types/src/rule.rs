//! Rules: weighted criteria with label mutations, claim rejection and stop

use crate::criteria::{self, Criteria};
use crate::error::Result;
use crate::expression::{ExpressionCache, ExpressionParams};
use crate::labels::{LabelOperations, LabelSet};
use crate::policy::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A policy rule. ACL rules share the same shape and use `add_role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub metadata: Metadata,

    /// Rules are applied in order of increasing weight
    #[serde(default)]
    pub weight: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    #[serde(default)]
    pub actions: RuleActions,
}

/// Actions executed when a rule matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub change_labels: LabelOperations,

    /// Whether the claim is allowed to be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimAction>,

    /// Stops evaluation of the remaining rules
    #[serde(default)]
    pub stop: bool,

    /// ACL only: role id to comma-separated namespaces
    #[serde(default)]
    pub add_role: BTreeMap<String, String>,
}

/// Allow or reject a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimAction {
    Allow,
    Reject,
}

/// Accumulated outcome of applying a sequence of rules
#[derive(Debug, Clone)]
pub struct RuleActionResult {
    pub allow_claim: bool,
    pub changed_labels_on_last_apply: bool,
    pub labels: LabelSet,
    /// Role id to namespaces, filled by ACL rules
    pub roles: BTreeMap<String, BTreeSet<String>>,
    /// Names of the rules that matched, in application order
    pub matched: Vec<String>,
}

impl RuleActionResult {
    pub fn new(labels: LabelSet) -> Self {
        Self {
            allow_claim: true,
            changed_labels_on_last_apply: false,
            labels,
            roles: BTreeMap::new(),
            matched: Vec::new(),
        }
    }
}

impl Rule {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, weight: i64) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            weight,
            criteria: None,
            actions: RuleActions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn matches(&self, params: &ExpressionParams, cache: &ExpressionCache) -> Result<bool> {
        criteria::matches(self.criteria.as_ref(), params, cache)
    }

    /// Applies rule actions to the accumulated result
    pub fn apply_actions(&self, result: &mut RuleActionResult) {
        if let Some(action) = self.actions.claim {
            result.allow_claim = action == ClaimAction::Allow;
        }

        result.changed_labels_on_last_apply = false;
        if !self.actions.change_labels.is_empty() {
            result.changed_labels_on_last_apply =
                result.labels.apply_transform(&self.actions.change_labels);
        }

        for (role, namespaces) in &self.actions.add_role {
            let entry = result.roles.entry(role.clone()).or_default();
            for ns in namespaces.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                entry.insert(ns.to_string());
            }
        }

        result.matched.push(self.metadata.name.clone());
    }
}

/// Sorts rules by weight, keeping declared order for equal weights
pub fn sort_by_weight<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Vec<&'a Rule> {
    let mut sorted: Vec<&Rule> = rules.into_iter().collect();
    sorted.sort_by_key(|r| r.weight);
    sorted
}

impl RuleActions {
    pub fn change_labels(ops: LabelOperations) -> Self {
        Self {
            change_labels: ops,
            ..Default::default()
        }
    }

    pub fn reject_claim() -> Self {
        Self {
            claim: Some(ClaimAction::Reject),
            ..Default::default()
        }
    }

    pub fn with_stop(mut self) -> Self {
        self.stop = true;
        self
    }
}
