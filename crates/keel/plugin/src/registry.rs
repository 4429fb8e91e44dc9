//! Plugin registry
//!
//! Plugin instances are constructed lazily and cached, one cluster plugin
//! per cluster and one code plugin per (cluster, code type) pair, so every
//! action in an apply cycle talks to the same adapter instance.

use crate::error::{PluginError, Result};
use crate::plugin::{ClusterPlugin, CodePlugin, PostProcessPlugin};
use dashmap::DashMap;
use keel_types::Cluster;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a cluster plugin for a cluster of a registered type
pub type ClusterPluginConstructor =
    Arc<dyn Fn(&Cluster) -> Result<Arc<dyn ClusterPlugin>> + Send + Sync>;

/// Builds a code plugin on top of the cluster plugin of the same cluster
pub type CodePluginConstructor =
    Arc<dyn Fn(&Cluster, Arc<dyn ClusterPlugin>) -> Result<Arc<dyn CodePlugin>> + Send + Sync>;

/// Source of plugins for the apply engine
pub trait PluginRegistry: Send + Sync {
    /// Cluster plugin for the given cluster
    fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterPlugin>>;

    /// Code plugin handling `code_type` on the given cluster
    fn for_code_type(&self, cluster: &Cluster, code_type: &str) -> Result<Arc<dyn CodePlugin>>;

    /// Post-process plugins, in registration order
    fn post_process_plugins(&self) -> Vec<Arc<dyn PostProcessPlugin>>;

    /// Cluster plugins instantiated so far, for cleanup at the end of a cycle
    fn instantiated_cluster_plugins(&self) -> Vec<Arc<dyn ClusterPlugin>>;
}

/// Registry keyed by cluster type and code type
#[derive(Default)]
pub struct DefaultPluginRegistry {
    cluster_types: HashMap<String, ClusterPluginConstructor>,
    code_types: HashMap<(String, String), CodePluginConstructor>,
    post_process: Vec<Arc<dyn PostProcessPlugin>>,
    cluster_cache: DashMap<String, Arc<dyn ClusterPlugin>>,
    code_cache: DashMap<(String, String), Arc<dyn CodePlugin>>,
}

impl DefaultPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_type(
        mut self,
        cluster_type: impl Into<String>,
        constructor: ClusterPluginConstructor,
    ) -> Self {
        self.cluster_types.insert(cluster_type.into(), constructor);
        self
    }

    pub fn with_code_type(
        mut self,
        cluster_type: impl Into<String>,
        code_type: impl Into<String>,
        constructor: CodePluginConstructor,
    ) -> Self {
        self.code_types
            .insert((cluster_type.into(), code_type.into()), constructor);
        self
    }

    pub fn with_post_process(mut self, plugin: Arc<dyn PostProcessPlugin>) -> Self {
        self.post_process.push(plugin);
        self
    }
}

impl PluginRegistry for DefaultPluginRegistry {
    fn for_cluster(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterPlugin>> {
        let locator = cluster.metadata.locator();
        if let Some(plugin) = self.cluster_cache.get(&locator) {
            return Ok(plugin.value().clone());
        }

        let constructor = self.cluster_types.get(&cluster.cluster_type).ok_or_else(|| {
            warn!(cluster = %locator, cluster_type = %cluster.cluster_type, "No plugin for cluster type");
            PluginError::ClusterTypeNotSupported {
                cluster: locator.clone(),
                cluster_type: cluster.cluster_type.clone(),
            }
        })?;

        let plugin = self
            .cluster_cache
            .entry(locator.clone())
            .or_try_insert_with(|| constructor(cluster))?
            .value()
            .clone();

        debug!(cluster = %locator, "Cluster plugin ready");
        Ok(plugin)
    }

    fn for_code_type(&self, cluster: &Cluster, code_type: &str) -> Result<Arc<dyn CodePlugin>> {
        let locator = cluster.metadata.locator();
        let cache_key = (locator.clone(), code_type.to_string());
        if let Some(plugin) = self.code_cache.get(&cache_key) {
            return Ok(plugin.value().clone());
        }

        let constructor = self
            .code_types
            .get(&(cluster.cluster_type.clone(), code_type.to_string()))
            .ok_or_else(|| PluginError::CodeTypeNotSupported {
                cluster: locator.clone(),
                code_type: code_type.to_string(),
            })?;

        let cluster_plugin = self.for_cluster(cluster)?;
        let plugin = self
            .code_cache
            .entry(cache_key)
            .or_try_insert_with(|| constructor(cluster, cluster_plugin))?
            .value()
            .clone();

        debug!(cluster = %locator, code_type = %code_type, "Code plugin ready");
        Ok(plugin)
    }

    fn post_process_plugins(&self) -> Vec<Arc<dyn PostProcessPlugin>> {
        self.post_process.clone()
    }

    fn instantiated_cluster_plugins(&self) -> Vec<Arc<dyn ClusterPlugin>> {
        self.cluster_cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
