//! Fake plugins for engine tests
//!
//! Nothing here touches real infrastructure. The noop plugins sleep for a
//! configurable delay so concurrency shows up in tests; the fail plugin
//! errors (or panics) for selected components.

use crate::error::{PluginError, Result};
use crate::plugin::{ClusterPlugin, CodeInvocation, CodePlugin, Endpoints, PostProcessPlugin};
use crate::registry::PluginRegistry;
use async_trait::async_trait;
use keel_resolve::{ExternalData, PolicyResolution};
use keel_types::{Cluster, EventLog, Policy};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cluster plugin that accepts everything
#[derive(Debug, Default)]
pub struct NoopClusterPlugin {
    cleanups: AtomicUsize,
}

impl NoopClusterPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterPlugin for NoopClusterPlugin {
    async fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Code plugin that only sleeps and counts calls
#[derive(Debug, Default)]
pub struct NoopCodePlugin {
    delay: Duration,
    created: AtomicUsize,
    updated: AtomicUsize,
    destroyed: AtomicUsize,
    endpoint_calls: AtomicUsize,
}

impl NoopCodePlugin {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn endpoint_calls(&self) -> usize {
        self.endpoint_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl CodePlugin for NoopCodePlugin {
    async fn create(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.pause().await;
        self.created.fetch_add(1, Ordering::SeqCst);
        invocation
            .event_log
            .info(format!("Deployed '{}'", invocation.deploy_name));
        Ok(())
    }

    async fn update(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.pause().await;
        self.updated.fetch_add(1, Ordering::SeqCst);
        invocation
            .event_log
            .info(format!("Updated '{}'", invocation.deploy_name));
        Ok(())
    }

    async fn destroy(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.pause().await;
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        invocation
            .event_log
            .info(format!("Destroyed '{}'", invocation.deploy_name));
        Ok(())
    }

    async fn endpoints(&self, invocation: CodeInvocation<'_>) -> Result<Endpoints> {
        self.pause().await;
        self.endpoint_calls.fetch_add(1, Ordering::SeqCst);
        let mut endpoints = Endpoints::new();
        endpoints.insert(
            "http".to_string(),
            format!("http://{}.{}", invocation.deploy_name, invocation.target_suffix),
        );
        Ok(endpoints)
    }
}

/// Code plugin that fails for a fixed set of component names
#[derive(Debug)]
pub struct FailCodePlugin {
    inner: NoopCodePlugin,
    fail_components: HashSet<String>,
    fail_as_panic: bool,
}

impl FailCodePlugin {
    pub fn new<I, S>(delay: Duration, fail_components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: NoopCodePlugin::new(delay),
            fail_components: fail_components.into_iter().map(Into::into).collect(),
            fail_as_panic: false,
        }
    }

    /// Panic instead of returning an error
    pub fn panicking(mut self) -> Self {
        self.fail_as_panic = true;
        self
    }

    pub fn inner(&self) -> &NoopCodePlugin {
        &self.inner
    }

    fn check(&self, operation: &'static str, invocation: &CodeInvocation<'_>) -> Result<()> {
        if !self.fail_components.contains(&invocation.component_name) {
            return Ok(());
        }
        if self.fail_as_panic {
            panic!(
                "{} panicked for component '{}'",
                operation, invocation.component_name
            );
        }
        Err(PluginError::Operation {
            operation,
            deploy_name: invocation.deploy_name.clone(),
            reason: format!("component '{}' is set to fail", invocation.component_name),
        })
    }
}

#[async_trait]
impl CodePlugin for FailCodePlugin {
    async fn create(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.check("create", &invocation)?;
        self.inner.create(invocation).await
    }

    async fn update(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.check("update", &invocation)?;
        self.inner.update(invocation).await
    }

    async fn destroy(&self, invocation: CodeInvocation<'_>) -> Result<()> {
        self.check("destroy", &invocation)?;
        self.inner.destroy(invocation).await
    }

    async fn endpoints(&self, invocation: CodeInvocation<'_>) -> Result<Endpoints> {
        self.check("endpoints", &invocation)?;
        self.inner.endpoints(invocation).await
    }
}

/// Post-process plugin counting how often it ran
#[derive(Debug, Default)]
pub struct RecordingPostProcess {
    runs: AtomicUsize,
    fail: bool,
}

impl RecordingPostProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostProcessPlugin for RecordingPostProcess {
    async fn process(
        &self,
        _desired_policy: &Policy,
        desired_state: &PolicyResolution,
        _external: &ExternalData,
        event_log: &mut EventLog,
    ) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PluginError::PostProcess("configured to fail".to_string()));
        }
        event_log.info(format!(
            "Post-processed {} component instances",
            desired_state.len()
        ));
        Ok(())
    }
}

/// Registry handing out the same plugins for every cluster and code type
pub struct FakeRegistry {
    cluster: Arc<NoopClusterPlugin>,
    code: Arc<dyn CodePlugin>,
    post_process: Vec<Arc<dyn PostProcessPlugin>>,
}

impl FakeRegistry {
    pub fn new(code: Arc<dyn CodePlugin>) -> Self {
        Self {
            cluster: Arc::new(NoopClusterPlugin::new()),
            code,
            post_process: Vec::new(),
        }
    }

    pub fn noop(delay: Duration) -> Self {
        Self::new(Arc::new(NoopCodePlugin::new(delay)))
    }

    pub fn with_post_process(mut self, plugin: Arc<dyn PostProcessPlugin>) -> Self {
        self.post_process.push(plugin);
        self
    }

    pub fn cluster_plugin(&self) -> &NoopClusterPlugin {
        &self.cluster
    }
}

impl PluginRegistry for FakeRegistry {
    fn for_cluster(&self, _cluster: &Cluster) -> Result<Arc<dyn ClusterPlugin>> {
        Ok(self.cluster.clone() as Arc<dyn ClusterPlugin>)
    }

    fn for_code_type(&self, _cluster: &Cluster, _code_type: &str) -> Result<Arc<dyn CodePlugin>> {
        Ok(self.code.clone())
    }

    fn post_process_plugins(&self) -> Vec<Arc<dyn PostProcessPlugin>> {
        self.post_process.clone()
    }

    fn instantiated_cluster_plugins(&self) -> Vec<Arc<dyn ClusterPlugin>> {
        vec![self.cluster.clone() as Arc<dyn ClusterPlugin>]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn invocation<'a>(component: &str, log: &'a mut EventLog) -> CodeInvocation<'a> {
        CodeInvocation {
            deploy_name: format!("a-{component}"),
            params: BTreeMap::new(),
            target_suffix: "prod".to_string(),
            component_name: component.to_string(),
            event_log: log,
        }
    }

    #[tokio::test]
    async fn test_noop_counts_calls() {
        let plugin = NoopCodePlugin::new(Duration::from_millis(1));
        let mut log = EventLog::silent("test");

        plugin.create(invocation("db", &mut log)).await.unwrap();
        let endpoints = plugin.endpoints(invocation("db", &mut log)).await.unwrap();

        assert_eq!(plugin.created(), 1);
        assert_eq!(plugin.endpoint_calls(), 1);
        assert_eq!(endpoints.get("http").unwrap(), "http://a-db.prod");
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_plugin_only_fails_selected_components() {
        let plugin = FailCodePlugin::new(Duration::ZERO, ["web"]);
        let mut log = EventLog::silent("test");

        assert!(plugin.create(invocation("db", &mut log)).await.is_ok());
        let err = plugin.create(invocation("web", &mut log)).await.unwrap_err();
        assert!(matches!(err, PluginError::Operation { operation: "create", .. }));
        assert_eq!(plugin.inner().created(), 1);
    }
}
