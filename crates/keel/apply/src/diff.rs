//! Diff of two resolved states
//!
//! Instances are compared by the set of claims resolved to them, not by
//! their full contents. A claim moving between existing instances costs an
//! attach and a detach; only an instance gaining its first claim or losing
//! its last one gets created or deleted.

use crate::action::Action;
use crate::plan::Plan;
use keel_resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Computes the plan turning `prev` into `next`
pub fn diff(next: &PolicyResolution, prev: &PolicyResolution) -> Plan {
    let all_keys: BTreeSet<&String> = next.keys().chain(prev.keys()).collect();

    let mut plan = Plan::new();
    let mut parent_updates: BTreeSet<ComponentInstanceKey> = BTreeSet::new();

    for key in &all_keys {
        plan.node_mut(key);

        let next_instance = next.instance(key);
        let prev_instance = prev.instance(key);
        diff_instance(next_instance, prev_instance, &mut plan, &mut parent_updates);

        for instance in prev_instance.into_iter().chain(next_instance) {
            for target in &instance.edges_out {
                plan.add_dependency(key, target);
            }
        }
    }

    // Parent updates go after the parent's own actions
    for parent in parent_updates {
        if next.instance(parent.as_str()).is_none() {
            continue;
        }
        let update = Action::Update { key: parent };
        if !plan.has_action(&update) {
            plan.add_action(update);
        }
    }

    debug!(
        keys = all_keys.len(),
        actions = plan.number_of_actions(),
        "State diff computed"
    );
    plan
}

fn diff_instance(
    next: Option<&ComponentInstance>,
    prev: Option<&ComponentInstance>,
    plan: &mut Plan,
    parent_updates: &mut BTreeSet<ComponentInstanceKey>,
) {
    let empty = BTreeMap::new();
    let next_claims = next.map_or(&empty, |i| &i.claim_ids);
    let prev_claims = prev.map_or(&empty, |i| &i.claim_ids);

    let Some(instance) = next.or(prev) else {
        return;
    };
    let key = &instance.key;
    let code_backed = next.is_some_and(|i| i.is_code());
    let mut refresh_endpoints = false;

    match (prev_claims.is_empty(), next_claims.is_empty()) {
        (true, false) => {
            plan.add_action(Action::Create { key: key.clone() });
            refresh_endpoints = true;
            if code_backed {
                parent_updates.insert(key.parent_service_key());
            }
        }
        (false, true) => {
            plan.add_action(Action::Delete { key: key.clone() });
        }
        (false, false) => {
            if let (Some(n), Some(p)) = (next, prev) {
                if code_backed && code_changed(n, p) {
                    plan.add_action(Action::Update { key: key.clone() });
                    refresh_endpoints = true;
                    parent_updates.insert(key.parent_service_key());
                }
            }

            for (claim_id, depth) in next_claims {
                if !prev_claims.contains_key(claim_id) {
                    plan.add_action(Action::AttachClaim {
                        key: key.clone(),
                        claim_id: claim_id.clone(),
                        depth: *depth,
                    });
                    refresh_endpoints = true;
                }
            }
            for claim_id in prev_claims.keys() {
                if !next_claims.contains_key(claim_id) {
                    plan.add_action(Action::DetachClaim {
                        key: key.clone(),
                        claim_id: claim_id.clone(),
                    });
                    refresh_endpoints = true;
                }
            }
        }
        (true, true) => {}
    }

    if refresh_endpoints && code_backed {
        plan.add_action(Action::FetchEndpoints { key: key.clone() });
    }
}

fn code_changed(next: &ComponentInstance, prev: &ComponentInstance) -> bool {
    next.code_type != prev.code_type || next.calculated_code_params != prev.calculated_code_params
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(component: &str) -> ComponentInstanceKey {
        ComponentInstanceKey::parse(&format!(
            "system#east#prod#main#contract-1#context-2#{}",
            component
        ))
        .unwrap()
    }

    fn service(claims: &[&str]) -> ComponentInstance {
        let mut instance = ComponentInstance::new(key("root"));
        for claim in claims {
            instance.add_claim(claim, 0);
        }
        instance.add_edge_out(key("db").as_str());
        instance
    }

    fn db(claims: &[&str], size: &str) -> ComponentInstance {
        let mut instance = ComponentInstance::new(key("db"));
        for claim in claims {
            instance.add_claim(claim, 1);
        }
        instance
            .add_code_params("helm", json!({"size": size}).as_object().unwrap().clone())
            .unwrap();
        instance.add_edge_in(key("root").as_str());
        instance
    }

    fn kinds(plan: &Plan, component: &str) -> Vec<&'static str> {
        plan.node(key(component).as_str())
            .map(|node| node.actions.iter().map(Action::kind).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_create_from_empty() {
        let next =
            PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "small")]);
        let plan = diff(&next, &PolicyResolution::new());

        assert_eq!(kinds(&plan, "db"), vec!["create", "endpoints"]);
        assert_eq!(kinds(&plan, "root"), vec!["create", "update"]);
        assert_eq!(plan.number_of_actions(), 4);

        // root waits for its component
        let root = plan.node(key("root").as_str()).unwrap();
        assert!(root.before.contains(key("db").as_str()));
        let db = plan.node(key("db").as_str()).unwrap();
        assert!(db.before_rev.contains(key("root").as_str()));
    }

    #[test]
    fn test_same_state_is_empty() {
        let state =
            PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "small")]);
        assert!(diff(&state, &state).is_empty());
    }

    #[test]
    fn test_code_change_updates_component_and_parent() {
        let prev =
            PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "small")]);
        let next =
            PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "large")]);
        let plan = diff(&next, &prev);

        assert_eq!(kinds(&plan, "db"), vec!["update", "endpoints"]);
        assert_eq!(kinds(&plan, "root"), vec!["update"]);
    }

    #[test]
    fn test_attach_and_detach() {
        let one = PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "small")]);
        let two = PolicyResolution::from_instances([
            service(&["c1", "c2"]),
            db(&["c1", "c2"], "small"),
        ]);

        let attach = diff(&two, &one);
        assert_eq!(kinds(&attach, "db"), vec!["attach-claim", "endpoints"]);
        assert_eq!(kinds(&attach, "root"), vec!["attach-claim"]);

        let detach = diff(&one, &two);
        assert_eq!(kinds(&detach, "db"), vec!["detach-claim", "endpoints"]);
        assert_eq!(kinds(&detach, "root"), vec!["detach-claim"]);
    }

    #[test]
    fn test_delete_all() {
        let prev =
            PolicyResolution::from_instances([service(&["c1"]), db(&["c1"], "small")]);
        let plan = diff(&PolicyResolution::new(), &prev);

        assert_eq!(kinds(&plan, "db"), vec!["delete"]);
        assert_eq!(kinds(&plan, "root"), vec!["delete"]);
        // edges from the previous state still order the graph
        let root = plan.node(key("root").as_str()).unwrap();
        assert!(root.before.contains(key("db").as_str()));
    }
}
