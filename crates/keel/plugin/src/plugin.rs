//! Plugin traits

use crate::error::Result;
use async_trait::async_trait;
use keel_resolve::{ExternalData, PolicyResolution};
use keel_types::{EventLog, Policy};
use std::collections::BTreeMap;

/// Endpoints exposed by a deployed instance, name to URL
pub type Endpoints = BTreeMap<String, String>;

/// Everything a code plugin needs to act on one component instance
pub struct CodeInvocation<'a> {
    /// Name to deploy under inside the cluster
    pub deploy_name: String,

    /// Calculated code params, flattened to dotted keys
    pub params: BTreeMap<String, String>,

    /// Target suffix of the instance, e.g. a namespace inside the cluster
    pub target_suffix: String,

    pub component_name: String,

    pub event_log: &'a mut EventLog,
}

/// Adapter for one cluster
#[async_trait]
pub trait ClusterPlugin: Send + Sync {
    /// Checks that the cluster is reachable and usable
    async fn validate(&self) -> Result<()>;

    /// Releases resources held for the cluster; called at the end of an apply cycle
    async fn cleanup(&self) -> Result<()>;
}

/// Adapter deploying one code type
#[async_trait]
pub trait CodePlugin: Send + Sync {
    async fn create(&self, invocation: CodeInvocation<'_>) -> Result<()>;

    async fn update(&self, invocation: CodeInvocation<'_>) -> Result<()>;

    async fn destroy(&self, invocation: CodeInvocation<'_>) -> Result<()>;

    async fn endpoints(&self, invocation: CodeInvocation<'_>) -> Result<Endpoints>;
}

/// Runs once per apply cycle, outside the per-instance action graph
#[async_trait]
pub trait PostProcessPlugin: Send + Sync {
    async fn process(
        &self,
        desired_policy: &Policy,
        desired_state: &PolicyResolution,
        external: &ExternalData,
        event_log: &mut EventLog,
    ) -> Result<()>;
}
