//! Shared inputs of every action in one apply run

use crate::error::{ApplyError, Result};
use crate::state::ActualStateUpdater;
use dashmap::DashMap;
use keel_plugin::{CodeInvocation, CodePlugin, PluginRegistry};
use keel_resolve::{ComponentInstance, ExternalData, PolicyResolution};
use keel_types::{params, Cluster, EventLog, Policy};
use std::sync::Arc;
use tracing::warn;

/// Everything actions read from or write to
#[derive(Clone)]
pub struct ActionContext {
    pub desired_policy: Arc<Policy>,
    pub desired_state: Arc<PolicyResolution>,

    /// Policy the actual state was produced from; used to tear instances down
    pub actual_policy: Arc<Policy>,
    pub actual_state: Arc<dyn ActualStateUpdater>,

    pub plugins: Arc<dyn PluginRegistry>,
    pub external: ExternalData,

    /// Cluster validation outcome per cluster locator, `None` if valid
    validated: Arc<DashMap<String, Option<String>>>,
}

impl ActionContext {
    pub fn new(
        desired_policy: Arc<Policy>,
        desired_state: Arc<PolicyResolution>,
        actual_policy: Arc<Policy>,
        actual_state: Arc<dyn ActualStateUpdater>,
        plugins: Arc<dyn PluginRegistry>,
        external: ExternalData,
    ) -> Self {
        Self {
            desired_policy,
            desired_state,
            actual_policy,
            actual_state,
            plugins,
            external,
            validated: Arc::new(DashMap::new()),
        }
    }

    /// Desired instance for a key
    pub fn desired(&self, key: &str) -> Result<&ComponentInstance> {
        self.desired_state
            .instance(key)
            .ok_or_else(|| ApplyError::NotDesired(key.to_string()))
    }

    /// Code plugin responsible for an instance, looking the cluster up in `policy`
    pub async fn code_plugin(
        &self,
        policy: &Policy,
        instance: &ComponentInstance,
    ) -> Result<Arc<dyn CodePlugin>> {
        let code_type = instance
            .code_type
            .as_deref()
            .ok_or_else(|| ApplyError::NotCode(instance.key.to_string()))?;

        let cluster = self.cluster(policy, instance)?;
        self.validate_cluster(cluster).await?;
        Ok(self.plugins.for_code_type(cluster, code_type)?)
    }

    fn cluster<'p>(&self, policy: &'p Policy, instance: &ComponentInstance) -> Result<&'p Cluster> {
        let key = &instance.key;
        policy
            .get_cluster(key.cluster_namespace(), key.cluster_name())
            .ok_or_else(|| ApplyError::ClusterNotFound {
                key: key.to_string(),
                cluster: format!("{}/{}", key.cluster_namespace(), key.cluster_name()),
            })
    }

    /// Validates a cluster once per apply run
    async fn validate_cluster(&self, cluster: &Cluster) -> Result<()> {
        let locator = cluster.metadata.locator();
        let cached = self.validated.get(&locator).map(|o| o.value().clone());
        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                let plugin = self.plugins.for_cluster(cluster)?;
                let outcome = plugin.validate().await.err().map(|e| e.to_string());
                if let Some(reason) = &outcome {
                    warn!(cluster = %locator, reason = %reason, "Cluster validation failed");
                }
                self.validated.insert(locator.clone(), outcome.clone());
                outcome
            }
        };

        match outcome {
            None => Ok(()),
            Some(reason) => Err(ApplyError::ClusterInvalid {
                cluster: locator,
                reason,
            }),
        }
    }
}

/// Builds the plugin invocation for an instance
pub(crate) fn invocation<'a>(
    instance: &ComponentInstance,
    event_log: &'a mut EventLog,
) -> CodeInvocation<'a> {
    CodeInvocation {
        deploy_name: instance.key.deploy_name(),
        params: params::flatten(&instance.calculated_code_params),
        target_suffix: instance.key.target_suffix().to_string(),
        component_name: instance.key.component_name().to_string(),
        event_log,
    }
}
