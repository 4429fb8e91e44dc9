//! Programmatic policy construction, mostly for tests
//!
//! Objects get generated names (`service-1`, `contract-2`, ...) in the
//! builder's current namespace. Every user the builder creates may consume
//! services, except those made with
//! [`PolicyBuilder::add_user_without_access`].

use crate::external::{ExternalData, InMemorySecretLoader, InMemoryUserLoader};
use keel_types::{
    Claim, Cluster, Component, Context, Contract, Criteria, LabelOperations, Policy, Rule,
    RuleActions, Service, User, SYSTEM_NS,
};
use serde_json::Value;
use std::cell::Cell;
use std::sync::Arc;

const NO_ACCESS_LABEL: &str = "no_access";

/// Builds policies together with the external data they refer to
pub struct PolicyBuilder {
    namespace: String,
    policy: Policy,
    users: Arc<InMemoryUserLoader>,
    secrets: Arc<InMemorySecretLoader>,
    next_id: Cell<usize>,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyBuilder {
    /// Creates a builder generating objects in the `main` namespace
    pub fn new() -> Self {
        Self::with_namespace("main")
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let mut policy = Policy::new();
        let mut actions = RuleActions::default();
        actions
            .add_role
            .insert("domain_admin".to_string(), String::new());
        policy.add_acl_rule(
            Rule::new(SYSTEM_NS, "builder-consumers", 0)
                .with_criteria(Criteria {
                    require_none: vec![format!("{} == 'true'", NO_ACCESS_LABEL)],
                    ..Default::default()
                })
                .with_actions(actions),
        );

        Self {
            namespace: namespace.into(),
            policy,
            users: Arc::new(InMemoryUserLoader::new()),
            secrets: Arc::new(InMemorySecretLoader::new()),
            next_id: Cell::new(0),
        }
    }

    /// Switches the namespace new objects are generated in
    pub fn switch_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Generates a unique name with the given prefix
    pub fn next_name(&self, prefix: &str) -> String {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        format!("{}-{}", prefix, id)
    }

    pub fn add_user(&mut self) -> User {
        self.add_user_with_labels(&[])
    }

    pub fn add_user_with_labels(&mut self, labels: &[(&str, &str)]) -> User {
        let name = self.next_name("user");
        let mut user = User::new(name.clone(), name);
        for (k, v) in labels {
            user = user.with_label(*k, *v);
        }
        self.users.add_user(user.clone());
        user
    }

    /// Adds a user the ACL does not allow to consume anything
    pub fn add_user_without_access(&mut self) -> User {
        self.add_user_with_labels(&[(NO_ACCESS_LABEL, "true")])
    }

    pub fn add_secret(&mut self, user: &User, name: &str, value: &str) {
        self.secrets.add_secret(&user.name, name, value);
    }

    pub fn add_cluster(&mut self) -> String {
        let name = self.next_name("cluster");
        // Clusters always live in the system namespace
        let _ = self
            .policy
            .add_cluster(Cluster::new(SYSTEM_NS, name.clone(), "kubernetes"));
        name
    }

    pub fn add_rule(&mut self, criteria: Criteria, actions: RuleActions) -> String {
        let name = self.next_name("rule");
        self.policy.add_rule(
            Rule::new(self.namespace.clone(), name.clone(), 0)
                .with_criteria(criteria)
                .with_actions(actions),
        );
        name
    }

    /// Adds a rule sending every claim to the given cluster
    pub fn add_rule_setting_target(&mut self, cluster: &str) -> String {
        self.add_rule(
            Criteria::always(),
            RuleActions::change_labels(LabelOperations::set_single("target", cluster)),
        )
    }

    pub fn code_component(&self, params: Value, discovery: Value) -> Component {
        Component::code(self.next_name("component"), "keel/code/test")
            .with_params(into_map(params))
            .with_discovery(into_map(discovery))
    }

    pub fn contract_component(&self, contract: &str) -> Component {
        Component::contract(self.next_name("component"), contract)
    }

    pub fn add_service(&mut self, components: Vec<Component>) -> String {
        let name = self.next_name("service");
        let mut service = Service::new(self.namespace.clone(), name.clone());
        for component in components {
            service = service.with_component(component);
        }
        self.policy.add_service(service);
        name
    }

    pub fn add_contract(&mut self, service: &str, criteria: Option<Criteria>) -> String {
        let name = self.next_name("contract");
        self.add_contract_named(&name, service, criteria);
        name
    }

    /// Adds a contract under a name reserved earlier with [`Self::next_name`]
    pub fn add_contract_named(&mut self, name: &str, service: &str, criteria: Option<Criteria>) {
        let mut context = Context::new(self.next_name("context"), service);
        context.criteria = criteria;
        self.policy
            .add_contract(Contract::new(self.namespace.clone(), name).with_context(context));
    }

    /// Adds a contract whose single context allocates with the given key templates
    pub fn add_contract_with_keys(&mut self, service: &str, keys: &[&str]) -> String {
        let name = self.next_name("contract");
        let context = Context::new(self.next_name("context"), service).with_keys(keys);
        self.policy
            .add_contract(Contract::new(self.namespace.clone(), name.clone()).with_context(context));
        name
    }

    /// Adds a contract with one context per criteria, all allocating the same service
    pub fn add_contract_multiple_contexts(&mut self, service: &str, criteria: Vec<Criteria>) -> String {
        let name = self.next_name("contract");
        let mut contract = Contract::new(self.namespace.clone(), name.clone());
        for c in criteria {
            contract = contract.with_context(Context::new(self.next_name("context"), service).with_criteria(c));
        }
        self.policy.add_contract(contract);
        name
    }

    /// Adds a claim and returns its id
    pub fn add_claim(&mut self, user: &User, contract: &str) -> String {
        self.add_claim_with_labels(user, contract, &[])
    }

    pub fn add_claim_with_labels(
        &mut self,
        user: &User,
        contract: &str,
        labels: &[(&str, &str)],
    ) -> String {
        let name = self.next_name("claim");
        let mut claim = Claim::new(
            self.namespace.clone(),
            name,
            user.id.clone(),
            format!("{}/{}", self.namespace, contract),
        );
        for (k, v) in labels {
            claim = claim.with_label(*k, *v);
        }
        let id = claim.id();
        self.policy.add_claim(claim);
        id
    }

    /// Removes a claim by id; returns false if there was none
    pub fn remove_claim(&mut self, claim_id: &str) -> bool {
        for ns in self.policy.namespaces.values_mut() {
            if let Some(pos) = ns.claims.iter().position(|c| c.id() == claim_id) {
                ns.claims.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut Policy {
        &mut self.policy
    }

    pub fn external(&self) -> ExternalData {
        ExternalData::new(self.users.clone(), self.secrets.clone())
    }

    /// Copy of the current policy plus the external data, builder stays usable
    pub fn snapshot(&self) -> (Policy, ExternalData) {
        (self.policy.clone(), self.external())
    }
}

fn into_map(value: Value) -> keel_types::NestedParameterMap {
    match value {
        Value::Object(map) => map,
        _ => keel_types::NestedParameterMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_policy_is_valid() {
        let mut b = PolicyBuilder::new();
        let cluster = b.add_cluster();
        b.add_rule_setting_target(&cluster);
        let service = b.add_service(vec![b.code_component(
            serde_json::json!({"image": "nginx"}),
            serde_json::json!({}),
        )]);
        let contract = b.add_contract(&service, None);
        let user = b.add_user();
        let claim = b.add_claim(&user, &contract);

        assert!(b.policy().validate().is_ok());
        assert_eq!(b.policy().claims().count(), 1);
        assert!(b.remove_claim(&claim));
        assert!(!b.remove_claim(&claim));
    }

    #[test]
    fn test_builder_users_can_consume() {
        let mut b = PolicyBuilder::new();
        let allowed = b.add_user();
        let denied = b.add_user_without_access();

        let acl = b.policy().acl();
        assert!(acl.can_consume(&allowed, "main").unwrap());
        assert!(!acl.can_consume(&denied, "main").unwrap());
    }
}
