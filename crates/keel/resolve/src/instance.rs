//! Component instances: data accumulated for one instance key

use crate::error::{ResolveError, Result};
use crate::key::ComponentInstanceKey;
use chrono::{DateTime, Utc};
use keel_types::{LabelSet, NestedParameterMap, RuleActionResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A resolved component instance.
///
/// Several claims may resolve to the same instance; their data gets merged
/// here. Code and discovery parameters must agree across all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstance {
    pub key: ComponentInstanceKey,

    /// Claim ids resolved to this instance, with the depth they were reached at
    #[serde(default)]
    pub claim_ids: BTreeMap<String, usize>,

    #[serde(default)]
    pub calculated_labels: LabelSet,

    #[serde(default)]
    pub calculated_discovery: NestedParameterMap,

    #[serde(default)]
    pub calculated_code_params: NestedParameterMap,

    /// Code type, set for code-backed component instances only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_type: Option<String>,

    /// Names of the rules that matched while resolving this instance
    #[serde(default)]
    pub rules_matched: BTreeSet<String>,

    #[serde(default)]
    pub edges_in: BTreeSet<String>,

    #[serde(default)]
    pub edges_out: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Endpoints reported by the code plugin
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    #[serde(default)]
    pub endpoints_up_to_date: bool,
}

impl ComponentInstance {
    pub fn new(key: ComponentInstanceKey) -> Self {
        Self {
            key,
            claim_ids: BTreeMap::new(),
            calculated_labels: LabelSet::default(),
            calculated_discovery: NestedParameterMap::new(),
            calculated_code_params: NestedParameterMap::new(),
            code_type: None,
            rules_matched: BTreeSet::new(),
            edges_in: BTreeSet::new(),
            edges_out: BTreeSet::new(),
            created_at: None,
            updated_at: None,
            endpoints: BTreeMap::new(),
            endpoints_up_to_date: false,
        }
    }

    /// True if a code plugin backs this instance
    pub fn is_code(&self) -> bool {
        self.code_type.is_some()
    }

    /// Records a claim, keeping the smallest depth it was reached at
    pub fn add_claim(&mut self, claim_id: &str, depth: usize) {
        self.claim_ids
            .entry(claim_id.to_string())
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    }

    pub fn add_rule_information(&mut self, result: &RuleActionResult) {
        self.rules_matched.extend(result.matched.iter().cloned());
    }

    pub fn add_labels(&mut self, labels: &LabelSet) {
        self.calculated_labels.add_labels(&labels.labels);
    }

    /// Records code params. An empty map carries nothing and never conflicts;
    /// a different code type or different non-empty params do.
    pub fn add_code_params(&mut self, code_type: &str, params: NestedParameterMap) -> Result<()> {
        if self.code_type.as_deref().is_some_and(|t| t != code_type) {
            return Err(ResolveError::ConflictingCodeParams(self.key.to_string()));
        }
        if self.calculated_code_params.is_empty() {
            self.calculated_code_params = params;
        } else if !params.is_empty() && self.calculated_code_params != params {
            return Err(ResolveError::ConflictingCodeParams(self.key.to_string()));
        }
        self.code_type = Some(code_type.to_string());
        Ok(())
    }

    /// Records discovery params, same empty-map rule as code params
    pub fn add_discovery_params(&mut self, params: NestedParameterMap) -> Result<()> {
        if self.calculated_discovery.is_empty() {
            self.calculated_discovery = params;
        } else if !params.is_empty() && self.calculated_discovery != params {
            return Err(ResolveError::ConflictingDiscoveryParams(self.key.to_string()));
        }
        Ok(())
    }

    pub fn add_edge_in(&mut self, key: &str) {
        self.edges_in.insert(key.to_string());
    }

    pub fn add_edge_out(&mut self, key: &str) {
        self.edges_out.insert(key.to_string());
    }

    /// Merges data of the same instance computed elsewhere
    pub fn append(&mut self, other: &ComponentInstance) -> Result<()> {
        if let Some(code_type) = &other.code_type {
            self.add_code_params(code_type, other.calculated_code_params.clone())?;
        }
        if !other.calculated_discovery.is_empty() {
            self.add_discovery_params(other.calculated_discovery.clone())?;
        }

        for (claim_id, depth) in &other.claim_ids {
            self.add_claim(claim_id, *depth);
        }
        self.add_labels(&other.calculated_labels);
        self.rules_matched
            .extend(other.rules_matched.iter().cloned());
        self.edges_in.extend(other.edges_in.iter().cloned());
        self.edges_out.extend(other.edges_out.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Cluster, Component, Context, Contract};
    use serde_json::json;

    fn instance() -> ComponentInstance {
        let component = Component::code("app", "helm");
        ComponentInstance::new(ComponentInstanceKey::new(
            &Cluster::new("system", "kube", "kubernetes"),
            "",
            &Contract::new("main", "web"),
            &Context::new("prod", "web"),
            &[],
            Some(&component),
        ))
    }

    fn params(value: serde_json::Value) -> NestedParameterMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_code_params_conflict() {
        let mut inst = instance();
        inst.add_code_params("helm", params(json!({"replicas": 1})))
            .unwrap();
        inst.add_code_params("helm", params(json!({"replicas": 1})))
            .unwrap();
        assert!(matches!(
            inst.add_code_params("helm", params(json!({"replicas": 2}))),
            Err(ResolveError::ConflictingCodeParams(_))
        ));
        assert!(inst.is_code());

        // nothing computed on one side is not a conflict
        inst.add_code_params("helm", NestedParameterMap::new())
            .unwrap();
        assert_eq!(inst.calculated_code_params["replicas"], json!(1));
        assert!(matches!(
            inst.add_code_params("terraform", params(json!({"replicas": 1}))),
            Err(ResolveError::ConflictingCodeParams(_))
        ));
    }

    #[test]
    fn test_add_claim_keeps_min_depth() {
        let mut inst = instance();
        inst.add_claim("main/c1", 2);
        inst.add_claim("main/c1", 0);
        inst.add_claim("main/c1", 1);
        assert_eq!(inst.claim_ids["main/c1"], 0);
    }

    #[test]
    fn test_append_merges() {
        let mut a = instance();
        a.add_claim("main/c1", 0);
        a.add_edge_in("x");

        let mut b = instance();
        b.add_claim("main/c2", 1);
        b.add_edge_out("y");
        b.add_discovery_params(params(json!({"url": "http://app"})))
            .unwrap();

        a.append(&b).unwrap();
        assert_eq!(a.claim_ids.len(), 2);
        assert!(a.edges_in.contains("x"));
        assert!(a.edges_out.contains("y"));
        assert_eq!(a.calculated_discovery["url"], "http://app");
    }
}
