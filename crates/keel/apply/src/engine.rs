//! Apply engine: runs a plan against real plugins

use crate::action::Action;
use crate::config::ApplyConfig;
use crate::context::ActionContext;
use crate::plan::{noop, wrap_parallel_with_limit, wrap_sequential, ApplyFunction, Plan};
use crate::result::{ApplyResult, ApplyResultUpdater};
use futures::FutureExt;
use keel_types::{EventLog, EventSeverity};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Executes plans for one apply cycle
pub struct ApplyEngine {
    ctx: Arc<ActionContext>,
    config: ApplyConfig,
}

impl ApplyEngine {
    pub fn new(ctx: ActionContext, config: ApplyConfig) -> Self {
        Self {
            ctx: Arc::new(ctx),
            config,
        }
    }

    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Runs every action of the plan, then post-processing and cluster cleanup.
    ///
    /// Action failures are counted and logged, never returned.
    #[instrument(skip_all, fields(actions = plan.number_of_actions(), dry_run = self.config.dry_run))]
    pub async fn apply(&self, plan: &Plan, event_log: &mut EventLog) -> ApplyResult {
        let action_logs = Arc::new(Mutex::new(EventLog::silent("actions")));
        let apply_fn = self.apply_function(action_logs.clone());

        let updater = Arc::new(ApplyResultUpdater::new());
        let result = plan.apply(apply_fn, updater, event_log).await;

        let mut action_logs = action_logs.lock().await;
        event_log.append(std::mem::replace(
            &mut *action_logs,
            EventLog::silent("actions"),
        ));

        info!(
            success = result.success,
            failed = result.failed,
            skipped = result.skipped,
            total = result.total,
            "Apply finished"
        );

        if self.config.dry_run {
            return result;
        }
        if result.total > 0 && self.config.run_post_process {
            self.post_process(event_log).await;
        }
        self.cleanup(event_log).await;
        result
    }

    fn apply_function(&self, action_logs: Arc<Mutex<EventLog>>) -> ApplyFunction {
        if self.config.dry_run {
            return noop();
        }

        let ctx = self.ctx.clone();
        let execute: ApplyFunction = Arc::new(move |action: Action| {
            let ctx = ctx.clone();
            let action_logs = action_logs.clone();
            async move {
                let mut log = EventLog::new(action.name());
                let outcome = action.execute(&ctx, &mut log).await;
                if let Err(e) = &outcome {
                    log.error(format!("{} failed: {}", action.kind(), e));
                }
                action_logs.lock().await.append(log);
                outcome
            }
            .boxed()
        });

        if self.config.max_concurrent_actions <= 1 {
            wrap_sequential(execute)
        } else {
            wrap_parallel_with_limit(self.config.max_concurrent_actions, execute)
        }
    }

    async fn post_process(&self, event_log: &mut EventLog) {
        for plugin in self.ctx.plugins.post_process_plugins() {
            let outcome = plugin
                .process(
                    &self.ctx.desired_policy,
                    &self.ctx.desired_state,
                    &self.ctx.external,
                    event_log,
                )
                .await;
            if let Err(e) = outcome {
                warn!(error = %e, "Post-processing failed");
                event_log.with_fields(
                    EventSeverity::Error,
                    "Post-processing failed",
                    [("error", e.to_string())],
                );
            }
        }
    }

    async fn cleanup(&self, event_log: &mut EventLog) {
        for plugin in self.ctx.plugins.instantiated_cluster_plugins() {
            if let Err(e) = plugin.cleanup().await {
                warn!(error = %e, "Cluster plugin cleanup failed");
                event_log.with_fields(
                    EventSeverity::Warn,
                    "Cluster plugin cleanup failed",
                    [("error", e.to_string())],
                );
            }
        }
    }
}
