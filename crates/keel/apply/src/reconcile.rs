//! One-shot reconcile pipeline: resolve, diff, apply

use crate::config::EngineConfig;
use crate::context::ActionContext;
use crate::diff::diff;
use crate::engine::ApplyEngine;
use crate::result::ApplyResult;
use crate::state::ActualStateUpdater;
use keel_plugin::PluginRegistry;
use keel_resolve::{ExternalData, PolicyResolution, PolicyResolver};
use keel_types::{EventLog, Policy};
use std::sync::Arc;
use tracing::{info, instrument};

/// Result of one reconcile run
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Desired state the run converged towards
    pub resolution: Arc<PolicyResolution>,

    /// Summary of the executed plan, see [`crate::Plan::as_text`]
    pub plan_text: String,

    pub result: ApplyResult,

    pub event_log: EventLog,
}

/// Drives the actual state towards a policy
pub struct Reconciler {
    policy: Arc<Policy>,
    actual_policy: Arc<Policy>,
    external: ExternalData,
    state: Arc<dyn ActualStateUpdater>,
    plugins: Arc<dyn PluginRegistry>,
    config: EngineConfig,
}

impl Reconciler {
    pub fn new(
        policy: Arc<Policy>,
        external: ExternalData,
        state: Arc<dyn ActualStateUpdater>,
        plugins: Arc<dyn PluginRegistry>,
    ) -> Self {
        Self {
            actual_policy: policy.clone(),
            policy,
            external,
            state,
            plugins,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Policy the current actual state was produced from, if it differs
    pub fn with_actual_policy(mut self, policy: Arc<Policy>) -> Self {
        self.actual_policy = policy;
        self
    }

    #[instrument(skip_all)]
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let mut event_log = EventLog::new("reconcile");

        let resolver = PolicyResolver::new(self.policy.clone(), self.external.clone())
            .with_config(self.config.resolver.clone());
        let desired = Arc::new(resolver.resolve(&mut event_log).await);

        let actual = self.state.get_updated_actual_state().await;
        let plan = diff(&desired, &actual);
        let plan_text = plan.as_text(false);
        info!(
            desired = desired.len(),
            actual = actual.len(),
            actions = plan.number_of_actions(),
            "Reconcile plan ready"
        );

        let ctx = ActionContext::new(
            self.policy.clone(),
            desired.clone(),
            self.actual_policy.clone(),
            self.state.clone(),
            self.plugins.clone(),
            self.external.clone(),
        );
        let engine = ApplyEngine::new(ctx, self.config.apply.clone());
        let result = engine.apply(&plan, &mut event_log).await;

        ReconcileOutcome {
            resolution: desired,
            plan_text,
            result,
            event_log,
        }
    }
}
