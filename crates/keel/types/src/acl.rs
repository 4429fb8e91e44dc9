//! Access control: mapping users to roles through ACL rules

use crate::claim::User;
use crate::error::Result;
use crate::expression::{ExpressionCache, ExpressionParams};
use crate::labels::LabelSet;
use crate::rule::{sort_by_weight, Rule, RuleActionResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Namespace span covering every namespace
pub const NAMESPACE_ALL: &str = "*";

/// User roles, from most to least privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclRole {
    DomainAdmin,
    NamespaceAdmin,
    ServiceConsumer,
    Nobody,
}

impl AclRole {
    pub const ORDERED: [AclRole; 4] = [
        AclRole::DomainAdmin,
        AclRole::NamespaceAdmin,
        AclRole::ServiceConsumer,
        AclRole::Nobody,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AclRole::DomainAdmin => "domain_admin",
            AclRole::NamespaceAdmin => "namespace_admin",
            AclRole::ServiceConsumer => "service_consumer",
            AclRole::Nobody => "nobody",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ORDERED.into_iter().find(|r| r.id() == id)
    }

    /// Privilege this role has over claims in the namespaces it spans
    pub fn claim_privilege(&self) -> Privilege {
        match self {
            AclRole::DomainAdmin | AclRole::NamespaceAdmin | AclRole::ServiceConsumer => {
                Privilege::FULL
            }
            AclRole::Nobody => Privilege::NONE,
        }
    }
}

/// View/manage privilege on an object kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub view: bool,
    pub manage: bool,
}

impl Privilege {
    pub const FULL: Privilege = Privilege {
        view: true,
        manage: true,
    };
    pub const NONE: Privilege = Privilege {
        view: false,
        manage: false,
    };
}

type RoleMap = BTreeMap<AclRole, BTreeSet<String>>;

/// Resolves user roles from ACL rules, caching the role map per user
#[derive(Debug)]
pub struct AclResolver {
    rules: Vec<Rule>,
    cache: ExpressionCache,
    role_maps: DashMap<String, Arc<RoleMap>>,
}

impl AclResolver {
    pub fn new<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        Self {
            rules: sort_by_weight(rules).into_iter().cloned().collect(),
            cache: ExpressionCache::new(),
            role_maps: DashMap::new(),
        }
    }

    /// Returns the user's privilege over claims in a namespace
    pub fn claim_privilege(&self, user: &User, namespace: &str) -> Result<Privilege> {
        let roles = self.role_map(user)?;
        for role in AclRole::ORDERED {
            if let Some(span) = roles.get(&role) {
                if span.contains(NAMESPACE_ALL) || span.contains(namespace) {
                    return Ok(role.claim_privilege());
                }
            }
        }
        Ok(Privilege::NONE)
    }

    /// A user can consume a service if it can manage claims in its namespace
    pub fn can_consume(&self, user: &User, namespace: &str) -> Result<bool> {
        Ok(self.claim_privilege(user, namespace)?.manage)
    }

    fn role_map(&self, user: &User) -> Result<Arc<RoleMap>> {
        if let Some(cached) = self.role_maps.get(&user.id) {
            return Ok(cached.clone());
        }

        let params = ExpressionParams::new(user.labels.clone());
        let mut result = RuleActionResult::new(LabelSet::default());
        for rule in &self.rules {
            if rule.matches(&params, &self.cache)? {
                rule.apply_actions(&mut result);
                if rule.actions.stop {
                    break;
                }
            }
        }

        let mut roles = RoleMap::new();
        for (role_id, namespaces) in result.roles {
            let Some(role) = AclRole::from_id(&role_id) else {
                continue;
            };
            let span = roles.entry(role).or_default();
            span.extend(namespaces);
            if role == AclRole::DomainAdmin {
                span.insert(NAMESPACE_ALL.to_string());
            }
        }

        let roles = Arc::new(roles);
        self.role_maps.insert(user.id.clone(), roles.clone());
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::Criteria;
    use crate::rule::RuleActions;

    fn role_rule(name: &str, expr: &str, role: &str, namespaces: &str) -> Rule {
        let mut actions = RuleActions::default();
        actions.add_role.insert(role.into(), namespaces.into());
        Rule::new("system", name, 0)
            .with_criteria(Criteria::require_all(&[expr]))
            .with_actions(actions)
    }

    fn user(id: &str, labels: &[(&str, &str)]) -> User {
        User::new(id, id).with_labels(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_domain_admin_spans_all_namespaces() {
        let rules = vec![role_rule("admins", "is_admin == 'true'", "domain_admin", "")];
        let acl = AclResolver::new(&rules);
        let admin = user("1", &[("is_admin", "true")]);

        assert!(acl.can_consume(&admin, "main").unwrap());
        assert!(acl.can_consume(&admin, "anything").unwrap());
    }

    #[test]
    fn test_consumer_limited_to_namespaces() {
        let rules = vec![role_rule("devs", "org == 'dev'", "service_consumer", "main")];
        let acl = AclResolver::new(&rules);
        let dev = user("2", &[("org", "dev")]);

        assert!(acl.can_consume(&dev, "main").unwrap());
        assert!(!acl.can_consume(&dev, "prod").unwrap());
    }

    #[test]
    fn test_nobody_without_rules() {
        let acl = AclResolver::new(&[]);
        assert!(!acl.can_consume(&user("3", &[]), "main").unwrap());
    }
}
