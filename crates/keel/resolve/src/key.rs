//! Component instance keys
//!
//! Every resolved component instance is addressed by a key derived from the
//! cluster, target suffix, namespace, contract, context (with resolved
//! allocation keys) and component name. Keys are never assigned: resolving
//! the same inputs twice yields byte-identical keys, which is what makes
//! diffing desired against actual state possible.

use keel_types::{Cluster, Component, Context, Contract};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator between key parts
pub const KEY_SEPARATOR: &str = "#";

/// Placeholder for key parts that are not resolved
pub const UNRESOLVED: &str = "unknown";

/// Component name of the service-level instance
pub use keel_types::ROOT_COMPONENT;

const DEPLOY_NAME_HASH_LEN: usize = 13;

/// Immutable key of a component instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentInstanceKey {
    cluster_namespace: String,
    cluster_name: String,
    target_suffix: String,
    namespace: String,
    contract_name: String,
    context_name_with_keys: String,
    component_name: String,
    key: String,
}

impl ComponentInstanceKey {
    /// Builds a key; `component = None` gives the service-level key
    pub fn new(
        cluster: &Cluster,
        target_suffix: &str,
        contract: &Contract,
        context: &Context,
        allocation_keys: &[String],
        component: Option<&Component>,
    ) -> Self {
        let mut context_name_with_keys = context.name.clone();
        if !allocation_keys.is_empty() {
            context_name_with_keys.push_str(KEY_SEPARATOR);
            context_name_with_keys.push_str(&allocation_keys.join(KEY_SEPARATOR));
        }
        let target_suffix = if target_suffix.is_empty() {
            UNRESOLVED
        } else {
            target_suffix
        };

        Self::from_parts(
            cluster.namespace(),
            cluster.name(),
            target_suffix,
            contract.namespace(),
            contract.name(),
            &context_name_with_keys,
            component.map_or(ROOT_COMPONENT, |c| c.name.as_str()),
        )
    }

    fn from_parts(
        cluster_namespace: &str,
        cluster_name: &str,
        target_suffix: &str,
        namespace: &str,
        contract_name: &str,
        context_name_with_keys: &str,
        component_name: &str,
    ) -> Self {
        let key = [
            cluster_namespace,
            cluster_name,
            target_suffix,
            namespace,
            contract_name,
            context_name_with_keys,
            component_name,
        ]
        .join(KEY_SEPARATOR);

        Self {
            cluster_namespace: cluster_namespace.to_string(),
            cluster_name: cluster_name.to_string(),
            target_suffix: target_suffix.to_string(),
            namespace: namespace.to_string(),
            contract_name: contract_name.to_string(),
            context_name_with_keys: context_name_with_keys.to_string(),
            component_name: component_name.to_string(),
            key,
        }
    }

    /// Parses a key string produced by [`ComponentInstanceKey::as_str`]
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
        if parts.len() < 7 {
            return None;
        }
        let last = parts.len() - 1;
        Some(Self::from_parts(
            parts[0],
            parts[1],
            parts[2],
            parts[3],
            parts[4],
            &parts[5..last].join(KEY_SEPARATOR),
            parts[last],
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn cluster_namespace(&self) -> &str {
        &self.cluster_namespace
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn target_suffix(&self) -> &str {
        &self.target_suffix
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn context_name_with_keys(&self) -> &str {
        &self.context_name_with_keys
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// True for the service-level instance
    pub fn is_service(&self) -> bool {
        self.component_name == ROOT_COMPONENT
    }

    /// True for an instance of a component within a service
    pub fn is_component(&self) -> bool {
        !self.is_service()
    }

    /// Key of the enclosing service instance; a service key maps to itself
    pub fn parent_service_key(&self) -> Self {
        if self.is_service() {
            return self.clone();
        }
        Self::from_parts(
            &self.cluster_namespace,
            &self.cluster_name,
            &self.target_suffix,
            &self.namespace,
            &self.contract_name,
            &self.context_name_with_keys,
            ROOT_COMPONENT,
        )
    }

    /// Stable instance id, the hex SHA-256 of the key
    pub fn instance_id(&self) -> String {
        hex::encode(Sha256::digest(self.key.as_bytes()))
    }

    /// Short name usable for deployments inside a cluster
    pub fn deploy_name(&self) -> String {
        let id = self.instance_id();
        format!("a-{}", &id[..DEPLOY_NAME_HASH_LEN])
    }
}

impl fmt::Display for ComponentInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<ComponentInstanceKey> for String {
    fn from(key: ComponentInstanceKey) -> Self {
        key.key
    }
}

impl TryFrom<String> for ComponentInstanceKey {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid component instance key '{}'", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(keys: &[String], component: Option<&Component>) -> ComponentInstanceKey {
        let cluster = Cluster::new("system", "kube", "kubernetes");
        let contract = Contract::new("main", "web");
        let context = Context::new("prod", "web");
        ComponentInstanceKey::new(&cluster, "team-a", &contract, &context, keys, component)
    }

    #[test]
    fn test_key_layout() {
        let component = Component::code("app", "helm");
        let k = key(&["alice".to_string()], Some(&component));
        assert_eq!(k.as_str(), "system#kube#team-a#main#web#prod#alice#app");
        assert!(k.is_component());
        assert_eq!(k.component_name(), "app");
    }

    #[test]
    fn test_empty_suffix_is_unresolved() {
        let cluster = Cluster::new("system", "kube", "kubernetes");
        let contract = Contract::new("main", "web");
        let context = Context::new("prod", "web");
        let k = ComponentInstanceKey::new(&cluster, "", &contract, &context, &[], None);
        assert_eq!(k.target_suffix(), UNRESOLVED);
        assert!(k.is_service());
    }

    #[test]
    fn test_parent_service_key() {
        let component = Component::code("app", "helm");
        let k = key(&[], Some(&component));
        let parent = k.parent_service_key();
        assert_eq!(parent.as_str(), "system#kube#team-a#main#web#prod#root");
        assert_eq!(parent.parent_service_key(), parent);
    }

    #[test]
    fn test_deploy_name() {
        let k = key(&[], None);
        let name = k.deploy_name();
        assert!(name.starts_with("a-"));
        assert_eq!(name.len(), 2 + DEPLOY_NAME_HASH_LEN);
        assert!(k.instance_id().starts_with(&name[2..]));
    }

    #[test]
    fn test_serde_through_string() {
        let component = Component::code("app", "helm");
        let k = key(&["a".to_string(), "b".to_string()], Some(&component));
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, format!("\"{}\"", k.as_str()));
        let back: ComponentInstanceKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
        assert_eq!(back.context_name_with_keys(), "prod#a#b");
    }

    proptest! {
        #[test]
        fn prop_keys_are_deterministic(
            suffix in "[a-z]{0,8}",
            keys in proptest::collection::vec("[a-z0-9]{1,6}", 0..3),
        ) {
            let cluster = Cluster::new("system", "kube", "kubernetes");
            let contract = Contract::new("main", "web");
            let context = Context::new("prod", "web");
            let component = Component::code("app", "helm");

            let a = ComponentInstanceKey::new(&cluster, &suffix, &contract, &context, &keys, Some(&component));
            let b = ComponentInstanceKey::new(&cluster, &suffix, &contract, &context, &keys, Some(&component));
            prop_assert_eq!(a.as_str(), b.as_str());
            prop_assert_eq!(a.deploy_name(), b.deploy_name());
            prop_assert_eq!(a.clone(), a.clone());

            let parent = a.parent_service_key();
            prop_assert_eq!(parent.parent_service_key(), parent);
        }
    }
}
