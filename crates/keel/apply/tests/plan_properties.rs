//! Properties of diff plans built from real resolutions

use futures::FutureExt;
use keel_apply::{diff, wrap_parallel_with_limit, Action, ApplyFunction, ApplyResultUpdater};
use keel_resolve::{PolicyBuilder, PolicyResolution, PolicyResolver};
use keel_types::EventLog;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn resolve(b: &PolicyBuilder) -> PolicyResolution {
    let (policy, external) = b.snapshot();
    let mut log = EventLog::silent("test");
    PolicyResolver::new(Arc::new(policy), external)
        .resolve(&mut log)
        .await
}

/// Two levels: app service -> database contract -> database service
fn two_level_policy(b: &mut PolicyBuilder) -> String {
    let cluster = b.add_cluster();
    b.add_rule_setting_target(&cluster);

    let db = b.code_component(json!({"version": "16"}), json!({}));
    let db_service = b.add_service(vec![db]);
    let db_contract = b.add_contract(&db_service, None);

    let db_ref = b.contract_component(&db_contract);
    let cache = b.code_component(json!({}), json!({}));
    let app = b
        .code_component(json!({"image": "app:1"}), json!({}))
        .depends_on(db_ref.name.clone());
    let app_service = b.add_service(vec![db_ref, cache, app]);
    b.add_contract(&app_service, None)
}

fn count(actions: &[&Action], kind: &str) -> usize {
    actions.iter().filter(|a| a.kind() == kind).count()
}

#[tokio::test]
async fn test_create_completeness() {
    let mut b = PolicyBuilder::new();
    let contract = two_level_policy(&mut b);
    let user = b.add_user();
    b.add_claim(&user, &contract);

    let desired = resolve(&b).await;
    let plan = diff(&desired, &PolicyResolution::new());
    let actions: Vec<&Action> = plan.actions().collect();

    let roots = desired.instances().filter(|i| i.key.is_service()).count();
    let components = desired.instances().filter(|i| i.key.is_component()).count();
    let code = desired.instances().filter(|i| i.is_code()).count();

    assert_eq!(roots, 2);
    assert_eq!(components, 4);
    assert_eq!(count(&actions, "create"), roots + components);
    assert_eq!(count(&actions, "endpoints"), code);
    assert_eq!(count(&actions, "delete"), 0);
}

#[tokio::test]
async fn test_same_resolution_diffs_to_nothing() {
    let mut b = PolicyBuilder::new();
    let contract = two_level_policy(&mut b);
    let first = b.add_user();
    let second = b.add_user();
    b.add_claim(&first, &contract);
    b.add_claim(&second, &contract);

    let a = resolve(&b).await;
    let again = resolve(&b).await;
    assert!(diff(&a, &a).is_empty());
    assert!(diff(&again, &a).is_empty());
}

#[tokio::test]
async fn test_attach_detach_symmetry() {
    let mut b = PolicyBuilder::new();
    let contract = two_level_policy(&mut b);
    let first = b.add_user();
    b.add_claim(&first, &contract);
    let one = resolve(&b).await;

    let second = b.add_user();
    b.add_claim(&second, &contract);
    let two = resolve(&b).await;
    assert_eq!(one.len(), two.len());

    let attach = diff(&two, &one);
    let attach_actions: Vec<&Action> = attach.actions().collect();
    assert_eq!(count(&attach_actions, "create"), 0);
    assert_eq!(count(&attach_actions, "update"), 0);
    for node in attach.nodes() {
        let attaches = node.actions.iter().filter(|a| a.kind() == "attach-claim").count();
        assert_eq!(attaches, 1, "one attach for {}", node.key);
    }

    let detach = diff(&one, &two);
    let detach_actions: Vec<&Action> = detach.actions().collect();
    assert_eq!(count(&detach_actions, "delete"), 0);
    for node in detach.nodes() {
        let detaches = node.actions.iter().filter(|a| a.kind() == "detach-claim").count();
        assert_eq!(detaches, 1, "one detach for {}", node.key);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_node_starts_before_its_dependencies_finish() {
    let mut b = PolicyBuilder::new();
    let contract = two_level_policy(&mut b);
    let user = b.add_user();
    b.add_claim(&user, &contract);

    let desired = resolve(&b).await;
    let plan = diff(&desired, &PolicyResolution::new());

    let clock = Arc::new(AtomicUsize::new(0));
    let started: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    let finished: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

    let (c, s, f) = (clock.clone(), started.clone(), finished.clone());
    let recording: ApplyFunction = Arc::new(move |action: Action| {
        let (c, s, f) = (c.clone(), s.clone(), f.clone());
        async move {
            let key = action.key().to_string();
            let tick = c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().entry(key.clone()).or_insert(tick);
            tokio::time::sleep(Duration::from_millis(2)).await;
            let tick = c.fetch_add(1, Ordering::SeqCst);
            f.lock().unwrap().insert(key, tick);
            Ok(())
        }
        .boxed()
    });

    let mut log = EventLog::silent("test");
    let result = plan
        .apply(
            wrap_parallel_with_limit(8, recording),
            Arc::new(ApplyResultUpdater::new()),
            &mut log,
        )
        .await;
    assert_eq!(result.success, result.total);

    let started = started.lock().unwrap();
    let finished = finished.lock().unwrap();
    for node in plan.nodes() {
        let Some(start) = started.get(&node.key) else {
            continue;
        };
        for before in &node.before {
            let done = finished[before];
            assert!(done < *start, "{} started before {} finished", node.key, before);
        }
    }
}
