//! End-to-end reconcile runs against fake plugins

use keel_apply::{ActualStateUpdater, EngineConfig, InMemoryActualState, Reconciler};
use keel_plugin::{FailCodePlugin, FakeRegistry, NoopCodePlugin, RecordingPostProcess};
use keel_resolve::PolicyBuilder;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One service with one code component, one contract, one cluster, one rule
fn single_service_policy(b: &mut PolicyBuilder) -> String {
    let cluster = b.add_cluster();
    b.add_rule_setting_target(&cluster);
    let component = b.code_component(json!({"size": "{{ .Labels.size }}"}), json!({}));
    let service = b.add_service(vec![component]);
    let contract = b.add_contract(&service, None);
    let user = b.add_user();
    b.add_claim_with_labels(&user, &contract, &[("size", "small")])
}

/// App service consuming a database contract; returns the database component name
fn two_level_policy(b: &mut PolicyBuilder) -> String {
    let cluster = b.add_cluster();
    b.add_rule_setting_target(&cluster);

    let db = b.code_component(json!({}), json!({"url": "postgres://{{ .Discovery.Instance }}"}));
    let db_name = db.name.clone();
    let db_service = b.add_service(vec![db]);
    let db_contract = b.add_contract(&db_service, None);

    let db_ref = b.contract_component(&db_contract);
    let app = b
        .code_component(json!({"image": "app:1"}), json!({}))
        .depends_on(db_ref.name.clone());
    let app_service = b.add_service(vec![db_ref, app]);
    let app_contract = b.add_contract(&app_service, None);

    let user = b.add_user();
    b.add_claim(&user, &app_contract);
    db_name
}

fn reconciler(
    b: &PolicyBuilder,
    state: &Arc<InMemoryActualState>,
    registry: &Arc<FakeRegistry>,
) -> Reconciler {
    let (policy, external) = b.snapshot();
    Reconciler::new(Arc::new(policy), external, state.clone(), registry.clone())
}

#[tokio::test]
async fn test_single_claim_scenario() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    single_service_policy(&mut b);

    let code = Arc::new(NoopCodePlugin::new(Duration::from_millis(1)));
    let post = Arc::new(RecordingPostProcess::new());
    let registry = Arc::new(FakeRegistry::new(code.clone()).with_post_process(post.clone()));
    let state = Arc::new(InMemoryActualState::new());

    let outcome = reconciler(&b, &state, &registry).reconcile().await;

    assert_eq!(outcome.resolution.len(), 2);
    assert_eq!(outcome.result.success, 4);
    assert_eq!(outcome.result.failed, 0);
    assert_eq!(outcome.result.skipped, 0);
    assert_eq!(outcome.result.total, 4);

    let actual = state.get_updated_actual_state().await;
    assert_eq!(actual.len(), 2);
    assert_eq!(code.created(), 1);
    assert_eq!(code.endpoint_calls(), 1);

    let component = actual.instances().find(|i| i.is_code()).unwrap();
    assert!(component.endpoints_up_to_date);
    assert!(component.endpoints.contains_key("http"));
    assert!(component.created_at.is_some());

    // only the component create shows up in the summary
    let lines: Vec<&str> = outcome.plan_text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "Create Instances");
    assert!(lines[1].starts_with("  [+] "));

    assert_eq!(post.runs(), 1);
    assert_eq!(registry.cluster_plugin().cleanups(), 1);
}

#[tokio::test]
async fn test_unchanged_policy_is_a_noop_and_keeps_timestamps() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    let claim = single_service_policy(&mut b);

    let post = Arc::new(RecordingPostProcess::new());
    let registry = Arc::new(FakeRegistry::noop(Duration::ZERO).with_post_process(post.clone()));
    let state = Arc::new(InMemoryActualState::new());

    reconciler(&b, &state, &registry).reconcile().await;
    let first = state.get_updated_actual_state().await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = reconciler(&b, &state, &registry).reconcile().await;
    assert_eq!(outcome.result.total, 0);
    assert!(outcome.plan_text.is_empty());
    assert_eq!(post.runs(), 1, "post-processing only runs when actions ran");

    let second = state.get_updated_actual_state().await;
    for instance in first.instances() {
        let again = second.instance(instance.key.as_str()).unwrap();
        assert_eq!(again.created_at, instance.created_at);
        assert_eq!(again.updated_at, instance.updated_at);
    }

    // A label change that alters code params updates component and parent
    tokio::time::sleep(Duration::from_millis(5)).await;
    for ns in b.policy_mut().namespaces.values_mut() {
        for c in ns.claims.iter_mut().filter(|c| c.id() == claim) {
            c.labels.insert("size".to_string(), "large".to_string());
        }
    }
    let outcome = reconciler(&b, &state, &registry).reconcile().await;
    // component update + endpoints, parent update
    assert_eq!(outcome.result.success, 3);
    assert_eq!(outcome.result.total, 3);

    let third = state.get_updated_actual_state().await;
    for instance in first.instances() {
        let changed = third.instance(instance.key.as_str()).unwrap();
        assert_eq!(changed.created_at, instance.created_at);
        assert!(changed.updated_at > instance.updated_at);
        if changed.is_code() {
            assert_eq!(changed.calculated_code_params["size"], "large");
            assert!(changed.endpoints_up_to_date);
        }
    }
}

#[tokio::test]
async fn test_removing_claim_deletes_everything() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    let claim = single_service_policy(&mut b);

    let code = Arc::new(NoopCodePlugin::new(Duration::ZERO));
    let registry = Arc::new(FakeRegistry::new(code.clone()));
    let state = Arc::new(InMemoryActualState::new());

    let (old_policy, _) = b.snapshot();
    reconciler(&b, &state, &registry).reconcile().await;

    assert!(b.remove_claim(&claim));
    let outcome = reconciler(&b, &state, &registry)
        .with_actual_policy(Arc::new(old_policy))
        .reconcile()
        .await;

    assert_eq!(outcome.result.success, 2);
    assert_eq!(outcome.result.total, 2);
    assert_eq!(code.destroyed(), 1);
    assert!(state.get_updated_actual_state().await.is_empty());
    assert!(outcome.plan_text.starts_with("Destroy Instances\n  [-] "));
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    single_service_policy(&mut b);

    let code = Arc::new(NoopCodePlugin::new(Duration::ZERO));
    let registry = Arc::new(FakeRegistry::new(code.clone()));
    let state = Arc::new(InMemoryActualState::new());

    let mut config = EngineConfig::default();
    config.apply.dry_run = true;
    let outcome = reconciler(&b, &state, &registry)
        .with_config(config)
        .reconcile()
        .await;

    assert_eq!(outcome.result.success, 4);
    assert_eq!(code.created(), 0);
    assert!(state.get_updated_actual_state().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_propagates_to_dependents_only() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    let db_name = two_level_policy(&mut b);

    let code = Arc::new(FailCodePlugin::new(Duration::from_millis(1), [db_name.clone()]));
    let registry = Arc::new(FakeRegistry::new(code.clone()));
    let state = Arc::new(InMemoryActualState::new());

    let outcome = reconciler(&b, &state, &registry).reconcile().await;
    let result = outcome.result;

    // db create fails; db endpoints, db root, the db reference and the app
    // root are skipped; the app component does not depend on the db
    assert_eq!(result.total, 9);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 6);
    assert_eq!(result.success, 2);
    assert_eq!(result.success + result.failed + result.skipped, result.total);

    let actual = state.get_updated_actual_state().await;
    assert_eq!(actual.len(), 1);
    let survivor = actual.instances().next().unwrap();
    assert!(survivor.is_code());
    assert_ne!(survivor.key.component_name(), db_name);
    assert_eq!(code.inner().created(), 1);
}

#[tokio::test]
async fn test_plugin_panic_is_contained() {
    init_tracing();
    let mut b = PolicyBuilder::new();
    single_service_policy(&mut b);

    let component = b
        .policy()
        .services()
        .flat_map(|s| s.components_sorted().unwrap())
        .find(|c| c.is_code())
        .map(|c| c.name.clone())
        .unwrap();

    let code = Arc::new(FailCodePlugin::new(Duration::ZERO, [component]).panicking());
    let registry = Arc::new(FakeRegistry::new(code));
    let state = Arc::new(InMemoryActualState::new());

    let outcome = reconciler(&b, &state, &registry).reconcile().await;
    assert_eq!(outcome.result.failed, 1);
    assert_eq!(outcome.result.skipped, 3);
    assert_eq!(outcome.result.total, 4);
    assert!(state.get_updated_actual_state().await.is_empty());
    assert!(outcome
        .event_log
        .entries()
        .iter()
        .any(|e| e.fields.get("error").is_some_and(|m| m.contains("panicked"))));
}
