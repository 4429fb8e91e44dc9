//! Actions on component instances
//!
//! Each action targets exactly one instance key. The action graph decides
//! ordering; an action itself only talks to the code plugin and the actual
//! state.

use crate::context::{invocation, ActionContext};
use crate::error::{ApplyError, Result};
use chrono::Utc;
use keel_resolve::ComponentInstanceKey;
use keel_types::EventLog;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One operation on one component instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Deploy the instance and record it in the actual state
    Create { key: ComponentInstanceKey },

    /// Redeploy with new parameters and bump the update timestamp
    Update { key: ComponentInstanceKey },

    /// Tear the instance down and forget it
    Delete { key: ComponentInstanceKey },

    AttachClaim {
        key: ComponentInstanceKey,
        claim_id: String,
        depth: usize,
    },

    DetachClaim {
        key: ComponentInstanceKey,
        claim_id: String,
    },

    /// Ask the code plugin for the instance endpoints
    FetchEndpoints { key: ComponentInstanceKey },
}

impl Action {
    pub fn key(&self) -> &ComponentInstanceKey {
        match self {
            Action::Create { key }
            | Action::Update { key }
            | Action::Delete { key }
            | Action::AttachClaim { key, .. }
            | Action::DetachClaim { key, .. }
            | Action::FetchEndpoints { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::AttachClaim { .. } => "attach-claim",
            Action::DetachClaim { .. } => "detach-claim",
            Action::FetchEndpoints { .. } => "endpoints",
        }
    }

    /// Unique name, e.g. `action-component-create#<key>`
    pub fn name(&self) -> String {
        match self {
            Action::AttachClaim { claim_id, .. } | Action::DetachClaim { claim_id, .. } => {
                format!("action-component-{}#{}#{}", self.kind(), self.key(), claim_id)
            }
            _ => format!("action-component-{}#{}", self.kind(), self.key()),
        }
    }

    /// Short marker used in plan text
    pub fn marker(&self) -> &'static str {
        match self {
            Action::Create { .. } => "[+]",
            Action::Delete { .. } => "[-]",
            Action::Update { .. } => "[*]",
            Action::AttachClaim { .. } => "[>]",
            Action::DetachClaim { .. } => "[<]",
            Action::FetchEndpoints { .. } => "[@]",
        }
    }

    /// Plan text section the action is listed under, with its position
    pub fn category(&self) -> (usize, &'static str) {
        match self {
            Action::Create { .. } => (0, "Create Instances"),
            Action::Delete { .. } => (1, "Destroy Instances"),
            Action::Update { .. } => (2, "Update Instances"),
            Action::AttachClaim { .. } => (3, "Add Consumers"),
            Action::DetachClaim { .. } => (4, "Remove Consumers"),
            Action::FetchEndpoints { .. } => (5, "Query Endpoints"),
        }
    }

    /// Runs the action against plugins and the actual state
    pub async fn execute(&self, ctx: &ActionContext, log: &mut EventLog) -> Result<()> {
        log.attach_to(self.key().as_str());
        match self {
            Action::Create { key } => create(ctx, key, log).await,
            Action::Update { key } => update(ctx, key, log).await,
            Action::Delete { key } => delete(ctx, key, log).await,
            Action::AttachClaim {
                key,
                claim_id,
                depth,
            } => {
                let claim_id = claim_id.clone();
                let depth = *depth;
                ctx.actual_state
                    .update_component_instance(
                        key.as_str(),
                        Box::new(move |instance| instance.add_claim(&claim_id, depth)),
                    )
                    .await?;
                log.debug(format!("Claim attached to '{}'", key));
                Ok(())
            }
            Action::DetachClaim { key, claim_id } => {
                let claim_id = claim_id.clone();
                ctx.actual_state
                    .update_component_instance(
                        key.as_str(),
                        Box::new(move |instance| {
                            instance.claim_ids.remove(&claim_id);
                        }),
                    )
                    .await?;
                log.debug(format!("Claim detached from '{}'", key));
                Ok(())
            }
            Action::FetchEndpoints { key } => fetch_endpoints(ctx, key, log).await,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AttachClaim { key, claim_id, .. } | Action::DetachClaim { key, claim_id } => {
                write!(f, "{} {} ({})", self.marker(), key, claim_id)
            }
            _ => write!(f, "{} {}", self.marker(), self.key()),
        }
    }
}

async fn create(ctx: &ActionContext, key: &ComponentInstanceKey, log: &mut EventLog) -> Result<()> {
    let mut instance = ctx.desired(key.as_str())?.clone();

    if instance.is_code() {
        let plugin = ctx.code_plugin(&ctx.desired_policy, &instance).await?;
        log.info(format!("Deploying new component instance '{}'", key));
        plugin.create(invocation(&instance, log)).await?;
    }

    let now = Utc::now();
    instance.created_at = Some(now);
    instance.updated_at = Some(now);
    instance.endpoints.clear();
    instance.endpoints_up_to_date = false;
    ctx.actual_state.create_component_instance(instance).await
}

async fn update(ctx: &ActionContext, key: &ComponentInstanceKey, log: &mut EventLog) -> Result<()> {
    let desired = ctx.desired(key.as_str())?.clone();

    if desired.is_code() {
        let plugin = ctx.code_plugin(&ctx.desired_policy, &desired).await?;
        log.info(format!("Updating component instance '{}'", key));
        plugin.update(invocation(&desired, log)).await?;
    }

    let now = Utc::now();
    ctx.actual_state
        .update_component_instance(
            key.as_str(),
            Box::new(move |instance| {
                instance.updated_at = Some(now);
                instance.calculated_labels = desired.calculated_labels;
                instance.calculated_discovery = desired.calculated_discovery;
                instance.calculated_code_params = desired.calculated_code_params;
                instance.code_type = desired.code_type;
                instance.edges_in = desired.edges_in;
                instance.edges_out = desired.edges_out;
                instance.endpoints_up_to_date = false;
            }),
        )
        .await?;
    Ok(())
}

async fn delete(ctx: &ActionContext, key: &ComponentInstanceKey, log: &mut EventLog) -> Result<()> {
    let actual = ctx
        .actual_state
        .get_component_instance(key.as_str())
        .await
        .ok_or_else(|| ApplyError::NotFound(key.to_string()))?;

    if actual.is_code() {
        let plugin = ctx.code_plugin(&ctx.actual_policy, &actual).await?;
        log.info(format!("Destroying component instance '{}'", key));
        plugin.destroy(invocation(&actual, log)).await?;
    }

    ctx.actual_state
        .delete_component_instance(key.as_str())
        .await?;
    Ok(())
}

async fn fetch_endpoints(
    ctx: &ActionContext,
    key: &ComponentInstanceKey,
    log: &mut EventLog,
) -> Result<()> {
    let actual = ctx
        .actual_state
        .get_component_instance(key.as_str())
        .await
        .ok_or_else(|| ApplyError::NotFound(key.to_string()))?;
    if !actual.is_code() {
        return Err(ApplyError::NotCode(key.to_string()));
    }

    let plugin = ctx.code_plugin(&ctx.desired_policy, &actual).await?;
    let endpoints = plugin.endpoints(invocation(&actual, log)).await?;
    log.with_fields(
        keel_types::EventSeverity::Debug,
        "Endpoints retrieved",
        [("count", endpoints.len().to_string())],
    );

    ctx.actual_state
        .update_component_instance(
            key.as_str(),
            Box::new(move |instance| {
                instance.endpoints = endpoints;
                instance.endpoints_up_to_date = true;
            }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(component: &str) -> ComponentInstanceKey {
        ComponentInstanceKey::parse(&format!(
            "system#east#prod#main#contract-1#context-2#{}",
            component
        ))
        .unwrap()
    }

    #[test]
    fn test_names_are_unique_per_claim() {
        let attach_a = Action::AttachClaim {
            key: key("db"),
            claim_id: "main/claim-1".to_string(),
            depth: 0,
        };
        let attach_b = Action::AttachClaim {
            key: key("db"),
            claim_id: "main/claim-2".to_string(),
            depth: 0,
        };
        assert_ne!(attach_a.name(), attach_b.name());
        assert_eq!(
            Action::Create { key: key("db") }.name(),
            "action-component-create#system#east#prod#main#contract-1#context-2#db"
        );
    }

    #[test]
    fn test_display_markers() {
        assert!(Action::Delete { key: key("db") }.to_string().starts_with("[-] "));
        let detach = Action::DetachClaim {
            key: key("db"),
            claim_id: "main/claim-1".to_string(),
        };
        assert!(detach.to_string().starts_with("[<] "));
        assert!(detach.to_string().ends_with("(main/claim-1)"));
    }

    #[test]
    fn test_serde_tagging() {
        let action = Action::FetchEndpoints { key: key("db") };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "fetch_endpoints");
        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }
}
