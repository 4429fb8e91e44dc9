//! Policy: namespaced services, contracts, clusters, rules and claims

use crate::acl::AclResolver;
use crate::claim::Claim;
use crate::cluster::{Cluster, Target};
use crate::contract::Contract;
use crate::error::{PolicyError, Result};
use crate::rule::Rule;
use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Namespace holding clusters, global rules and ACL rules
pub const SYSTEM_NS: &str = "system";

/// Namespace and name of a policy object
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub namespace: String,
    pub name: String,
}

impl Metadata {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace/name`
    pub fn locator(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Objects within a single namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyNamespace {
    pub name: String,

    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    #[serde(default)]
    pub contracts: BTreeMap<String, Contract>,

    #[serde(default)]
    pub clusters: BTreeMap<String, Cluster>,

    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub acl_rules: Vec<Rule>,

    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl PolicyNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The whole policy, made of namespaces
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Policy {
    pub namespaces: BTreeMap<String, PolicyNamespace>,

    #[serde(skip)]
    acl: OnceLock<AclResolver>,
}

impl Clone for Policy {
    fn clone(&self) -> Self {
        Self {
            namespaces: self.namespaces.clone(),
            acl: OnceLock::new(),
        }
    }
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace_mut(&mut self, name: &str) -> &mut PolicyNamespace {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| PolicyNamespace::new(name))
    }

    pub fn add_service(&mut self, service: Service) {
        let ns = self.namespace_mut(&service.metadata.namespace.clone());
        ns.services.insert(service.metadata.name.clone(), service);
    }

    pub fn add_contract(&mut self, contract: Contract) {
        let ns = self.namespace_mut(&contract.metadata.namespace.clone());
        ns.contracts.insert(contract.metadata.name.clone(), contract);
    }

    /// Adds a cluster; clusters may only live in the system namespace
    pub fn add_cluster(&mut self, cluster: Cluster) -> Result<()> {
        if cluster.metadata.namespace != SYSTEM_NS {
            return Err(PolicyError::ClusterOutsideSystemNamespace {
                cluster: cluster.metadata.name.clone(),
                namespace: cluster.metadata.namespace.clone(),
            });
        }
        let ns = self.namespace_mut(SYSTEM_NS);
        ns.clusters.insert(cluster.metadata.name.clone(), cluster);
        Ok(())
    }

    pub fn add_rule(&mut self, rule: Rule) {
        let ns = self.namespace_mut(&rule.metadata.namespace.clone());
        ns.rules.push(rule);
    }

    pub fn add_acl_rule(&mut self, mut rule: Rule) {
        rule.metadata.namespace = SYSTEM_NS.to_string();
        self.namespace_mut(SYSTEM_NS).acl_rules.push(rule);
        self.acl = OnceLock::new();
    }

    pub fn add_claim(&mut self, claim: Claim) {
        let ns = self.namespace_mut(&claim.metadata.namespace.clone());
        ns.claims.push(claim);
    }

    /// All claims, ordered by namespace then declaration order
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.namespaces.values().flat_map(|ns| ns.claims.iter())
    }

    /// Splits a `[namespace/]name` locator relative to the current namespace
    pub fn parse_locator<'a>(locator: &'a str, current_ns: &'a str) -> Result<(&'a str, &'a str)> {
        let parts: Vec<&str> = locator.split('/').collect();
        match parts.as_slice() {
            [name] => Ok((current_ns, *name)),
            [ns, name] => Ok((*ns, *name)),
            _ => Err(PolicyError::InvalidLocator(locator.to_string())),
        }
    }

    fn lookup_namespace(&self, ns: &str, locator: &str) -> Result<&PolicyNamespace> {
        self.namespaces
            .get(ns)
            .ok_or_else(|| PolicyError::NamespaceNotFound {
                namespace: ns.to_string(),
                locator: locator.to_string(),
            })
    }

    pub fn get_service(&self, locator: &str, current_ns: &str) -> Result<Option<&Service>> {
        let (ns, name) = Self::parse_locator(locator, current_ns)?;
        Ok(self.lookup_namespace(ns, locator)?.services.get(name))
    }

    pub fn get_contract(&self, locator: &str, current_ns: &str) -> Result<Option<&Contract>> {
        let (ns, name) = Self::parse_locator(locator, current_ns)?;
        Ok(self.lookup_namespace(ns, locator)?.contracts.get(name))
    }

    /// Looks up a cluster by exact namespace and name
    pub fn get_cluster(&self, namespace: &str, name: &str) -> Option<&Cluster> {
        self.namespaces.get(namespace)?.clusters.get(name)
    }

    /// Finds the cluster of a deployment target.
    ///
    /// Without an explicit namespace the current namespace is tried first,
    /// then the system namespace.
    pub fn find_cluster(&self, target: &Target, current_ns: &str) -> Option<&Cluster> {
        if !target.cluster_namespace.is_empty() {
            return self.get_cluster(&target.cluster_namespace, &target.cluster_name);
        }
        self.get_cluster(current_ns, &target.cluster_name)
            .or_else(|| self.get_cluster(SYSTEM_NS, &target.cluster_name))
    }

    /// Rules applying to objects in a namespace: its own rules plus system rules
    pub fn rules_for(&self, namespace: &str) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = Vec::new();
        if let Some(ns) = self.namespaces.get(namespace) {
            rules.extend(ns.rules.iter());
        }
        if namespace != SYSTEM_NS {
            if let Some(system) = self.namespaces.get(SYSTEM_NS) {
                rules.extend(system.rules.iter());
            }
        }
        crate::rule::sort_by_weight(rules)
    }

    /// ACL resolver built lazily from the system namespace ACL rules
    pub fn acl(&self) -> &AclResolver {
        self.acl.get_or_init(|| match self.namespaces.get(SYSTEM_NS) {
            Some(system) => AclResolver::new(&system.acl_rules),
            None => AclResolver::new(&[]),
        })
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.namespaces.values().flat_map(|ns| ns.services.values())
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.namespaces.values().flat_map(|ns| ns.contracts.values())
    }
}
