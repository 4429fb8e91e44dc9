//! Policy resolution: the full resolved state of component instances

use crate::error::Result;
use crate::instance::ComponentInstance;
use crate::key::ComponentInstanceKey;
use keel_types::{LabelSet, NestedParameterMap, RuleActionResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Outcome of resolving one claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResolution {
    /// Key of the service instance the claim resolved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,

    /// Why the claim could not be resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClaimResolution {
    pub fn resolved(service_key: &ComponentInstanceKey) -> Self {
        Self {
            service_key: Some(service_key.to_string()),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            service_key: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.service_key.is_some()
    }
}

/// Resolved state: component instances, claim statuses and processing order.
///
/// Used both for the desired state computed by the resolver and for the
/// actual state recorded after applying actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyResolution {
    instances: BTreeMap<String, ComponentInstance>,

    #[serde(default)]
    claims: BTreeMap<String, ClaimResolution>,

    /// Keys in the order they were first resolved
    #[serde(default)]
    processing_order: Vec<String>,

    #[serde(skip)]
    processing_seen: HashSet<String>,
}

impl PolicyResolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a resolution out of existing instances, e.g. loaded actual state
    pub fn from_instances(instances: impl IntoIterator<Item = ComponentInstance>) -> Self {
        let mut resolution = Self::new();
        for instance in instances {
            resolution.insert_instance(instance);
        }
        resolution
    }

    pub fn instance(&self, key: &str) -> Option<&ComponentInstance> {
        self.instances.get(key)
    }

    pub fn instances(&self) -> impl Iterator<Item = &ComponentInstance> {
        self.instances.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.instances.keys()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Inserts or replaces an instance
    pub fn insert_instance(&mut self, instance: ComponentInstance) {
        let key = instance.key.clone();
        self.instances.insert(key.to_string(), instance);
        self.record_processing_order(&key);
    }

    pub fn remove_instance(&mut self, key: &str) -> Option<ComponentInstance> {
        let removed = self.instances.remove(key);
        if removed.is_some() {
            self.processing_order.retain(|k| k != key);
            self.processing_seen.remove(key);
        }
        removed
    }

    /// Returns the instance for a key, creating an empty one if needed
    pub fn entry(&mut self, key: &ComponentInstanceKey) -> &mut ComponentInstance {
        self.instances
            .entry(key.to_string())
            .or_insert_with(|| ComponentInstance::new(key.clone()))
    }

    /// Records that a claim got resolved to an instance
    pub fn record_resolved(
        &mut self,
        key: &ComponentInstanceKey,
        claim_id: &str,
        depth: usize,
        rules: &RuleActionResult,
    ) {
        let instance = self.entry(key);
        instance.add_claim(claim_id, depth);
        instance.add_rule_information(rules);
        self.record_processing_order(key);
    }

    pub fn record_code_params(
        &mut self,
        key: &ComponentInstanceKey,
        code_type: &str,
        params: NestedParameterMap,
    ) -> Result<()> {
        self.entry(key).add_code_params(code_type, params)
    }

    pub fn record_discovery_params(
        &mut self,
        key: &ComponentInstanceKey,
        params: NestedParameterMap,
    ) -> Result<()> {
        self.entry(key).add_discovery_params(params)
    }

    pub fn record_labels(&mut self, key: &ComponentInstanceKey, labels: &LabelSet) {
        self.entry(key).add_labels(labels);
    }

    /// Stores a directed edge; a missing source (top of a claim) is ignored
    pub fn store_edge(&mut self, src: Option<&ComponentInstanceKey>, dst: &ComponentInstanceKey) {
        let Some(src) = src else {
            return;
        };
        self.entry(src).add_edge_out(dst.as_str());
        self.entry(dst).add_edge_in(src.as_str());
    }

    pub fn record_claim(&mut self, claim_id: impl Into<String>, status: ClaimResolution) {
        self.claims.insert(claim_id.into(), status);
    }

    pub fn claim(&self, claim_id: &str) -> Option<&ClaimResolution> {
        self.claims.get(claim_id)
    }

    pub fn claims(&self) -> &BTreeMap<String, ClaimResolution> {
        &self.claims
    }

    /// Keys in the deterministic first-seen order
    pub fn processing_order(&self) -> &[String] {
        &self.processing_order
    }

    fn record_processing_order(&mut self, key: &ComponentInstanceKey) {
        if self.processing_seen.len() != self.processing_order.len() {
            self.processing_seen = self.processing_order.iter().cloned().collect();
        }
        if self.processing_seen.insert(key.to_string()) {
            self.processing_order.push(key.to_string());
        }
    }

    /// Merges instance data from another resolution into this one
    pub fn append(&mut self, other: &PolicyResolution) -> Result<()> {
        for key in other.merge_order() {
            if let Some(instance) = other.instances.get(key) {
                self.entry(&instance.key).append(instance)?;
                self.record_processing_order(&instance.key);
            }
        }
        Ok(())
    }

    /// Processing order first, then any instance not in it
    fn merge_order(&self) -> impl Iterator<Item = &String> {
        let ordered: HashSet<&String> = self.processing_order.iter().collect();
        self.processing_order
            .iter()
            .chain(self.instances.keys().filter(move |k| !ordered.contains(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Cluster, Component, Context, Contract};

    fn key(component: Option<&str>) -> ComponentInstanceKey {
        let component = component.map(|name| Component::code(name, "helm"));
        ComponentInstanceKey::new(
            &Cluster::new("system", "kube", "kubernetes"),
            "",
            &Contract::new("main", "web"),
            &Context::new("prod", "web"),
            &[],
            component.as_ref(),
        )
    }

    #[test]
    fn test_store_edge() {
        let mut resolution = PolicyResolution::new();
        let service = key(None);
        let app = key(Some("app"));

        resolution.store_edge(None, &service);
        resolution.store_edge(Some(&service), &app);

        assert!(resolution.instance(service.as_str()).unwrap().edges_out.contains(app.as_str()));
        assert!(resolution.instance(app.as_str()).unwrap().edges_in.contains(service.as_str()));
    }

    #[test]
    fn test_processing_order_is_deduplicated() {
        let mut resolution = PolicyResolution::new();
        let rules = RuleActionResult::new(LabelSet::default());
        let app = key(Some("app"));
        let service = key(None);

        resolution.record_resolved(&app, "main/c1", 0, &rules);
        resolution.record_resolved(&service, "main/c1", 0, &rules);
        resolution.record_resolved(&app, "main/c2", 0, &rules);

        assert_eq!(
            resolution.processing_order(),
            &[app.to_string(), service.to_string()]
        );
        assert_eq!(resolution.instance(app.as_str()).unwrap().claim_ids.len(), 2);
    }

    #[test]
    fn test_append_keeps_order() {
        let rules = RuleActionResult::new(LabelSet::default());
        let mut a = PolicyResolution::new();
        a.record_resolved(&key(Some("db")), "main/c1", 0, &rules);

        let mut b = PolicyResolution::new();
        b.record_resolved(&key(Some("app")), "main/c2", 0, &rules);
        b.record_resolved(&key(Some("db")), "main/c2", 0, &rules);

        a.append(&b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a.processing_order()[0], key(Some("db")).to_string());
        assert_eq!(a.processing_order()[1], key(Some("app")).to_string());
    }

    #[test]
    fn test_remove_instance() {
        let mut resolution = PolicyResolution::from_instances([ComponentInstance::new(key(None))]);
        assert!(resolution.remove_instance(key(None).as_str()).is_some());
        assert!(resolution.is_empty());
        assert!(resolution.processing_order().is_empty());
    }
}
