//! Clusters and deployment targets

use crate::error::{PolicyError, Result};
use crate::policy::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A deployment target where code components get instantiated.
///
/// The cluster type selects the plugin; `config` is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(rename = "type")]
    pub cluster_type: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub config: serde_json::Value,
}

impl Cluster {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cluster_type: impl Into<String>,
    ) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            cluster_type: cluster_type.into(),
            labels: BTreeMap::new(),
            config: serde_json::Value::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

/// Deployment target parsed from `[namespace/]cluster[.suffix]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Namespace the cluster belongs to, empty if not specified
    pub cluster_namespace: String,
    pub cluster_name: String,
    /// Additional specifier, e.g. a namespace inside the cluster
    pub suffix: String,
}

impl Target {
    /// Parses a target label.
    ///
    /// `#` is rejected since the suffix becomes part of instance keys.
    pub fn parse(target: &str) -> Result<Self> {
        if target.contains('#') {
            return Err(PolicyError::InvalidTarget(target.to_string()));
        }
        let mut result = Target::default();

        let rest = match target.split_once('/') {
            Some((ns, rest)) => {
                result.cluster_namespace = ns.to_string();
                rest
            }
            None => target,
        };

        match rest.split_once('.') {
            Some((cluster, suffix)) => {
                result.cluster_name = cluster.to_string();
                result.suffix = suffix.to_string();
            }
            None => result.cluster_name = rest.to_string(),
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let t = Target::parse("system/kube-east.team-a").unwrap();
        assert_eq!(t.cluster_namespace, "system");
        assert_eq!(t.cluster_name, "kube-east");
        assert_eq!(t.suffix, "team-a");

        let t = Target::parse("kube-west").unwrap();
        assert_eq!(t.cluster_namespace, "");
        assert_eq!(t.cluster_name, "kube-west");
        assert_eq!(t.suffix, "");
    }

    #[test]
    fn test_target_with_key_separator_rejected() {
        assert!(matches!(
            Target::parse("kube-east.team#a"),
            Err(PolicyError::InvalidTarget(_))
        ));
    }
}
