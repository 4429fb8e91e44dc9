//! Action plan and its concurrent executor
//!
//! A plan holds one [`GraphNode`] per instance key. A node lists the actions
//! for its key in execution order, the keys it has to wait for (`before`)
//! and the keys waiting for it (`before_rev`).
//!
//! Execution is Kahn's algorithm over a ready queue: nodes whose `before`
//! set has drained are spawned, and each finished node decrements the
//! in-degree of everything in its `before_rev` set. A failed node marks
//! those dependents right away, so their actions get reported as skipped.

use crate::action::Action;
use crate::error::{ApplyError, Result};
use crate::result::{ApplyResult, ApplyResultUpdater};
use futures::future::BoxFuture;
use futures::FutureExt;
use keel_types::{EventLog, EventSeverity};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Executes one action
pub type ApplyFunction = Arc<dyn Fn(Action) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Caps the number of actions running at once
pub fn wrap_parallel_with_limit(max_concurrent: usize, apply_fn: ApplyFunction) -> ApplyFunction {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    Arc::new(move |action| {
        let semaphore = semaphore.clone();
        let apply_fn = apply_fn.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.ok();
            apply_fn(action).await
        }
        .boxed()
    })
}

/// Runs actions one at a time, in whatever order the executor reaches them
pub fn wrap_sequential(apply_fn: ApplyFunction) -> ApplyFunction {
    let lock = Arc::new(Mutex::new(()));
    Arc::new(move |action| {
        let lock = lock.clone();
        let apply_fn = apply_fn.clone();
        async move {
            let _guard = lock.lock().await;
            apply_fn(action).await
        }
        .boxed()
    })
}

/// Succeeds without doing anything
pub fn noop() -> ApplyFunction {
    Arc::new(|_action| async { Ok(()) }.boxed())
}

/// Actions of one instance key plus its ordering edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,

    /// Run in order; the first failure skips the rest
    pub actions: Vec<Action>,

    /// Keys that must finish before this node starts
    pub before: BTreeSet<String>,

    /// Keys waiting for this node
    pub before_rev: BTreeSet<String>,
}

impl GraphNode {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }
}

/// Graph of actions, keyed by component instance key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    nodes: BTreeMap<String, GraphNode>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, key: &str) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Node for a key, created empty if missing
    pub fn node_mut(&mut self, key: &str) -> &mut GraphNode {
        self.nodes
            .entry(key.to_string())
            .or_insert_with(|| GraphNode::new(key))
    }

    /// Appends an action to the node of its key
    pub fn add_action(&mut self, action: Action) {
        self.node_mut(action.key().as_str()).actions.push(action);
    }

    pub fn has_action(&self, action: &Action) -> bool {
        self.nodes
            .get(action.key().as_str())
            .is_some_and(|node| node.actions.contains(action))
    }

    /// Makes `key` wait until `before` has finished
    pub fn add_dependency(&mut self, key: &str, before: &str) {
        if key == before {
            return;
        }
        self.node_mut(key).before.insert(before.to_string());
        self.node_mut(before).before_rev.insert(key.to_string());
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.nodes.values().flat_map(|node| node.actions.iter())
    }

    pub fn number_of_actions(&self) -> usize {
        self.nodes.values().map(|node| node.actions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_actions() == 0
    }

    /// Deterministic text rendering: a heading per action category, then one
    /// indented line per action sorted by key.
    ///
    /// Unless `verbose` is set, service-level instances and endpoint fetches
    /// are left out.
    pub fn as_text(&self, verbose: bool) -> String {
        let mut lines: Vec<((usize, &'static str), &str, String)> = self
            .actions()
            .filter(|action| {
                verbose
                    || (action.key().is_component()
                        && !matches!(action, Action::FetchEndpoints { .. }))
            })
            .map(|action| (action.category(), action.key().as_str(), action.to_string()))
            .collect();
        lines.sort();

        let mut text = Vec::with_capacity(lines.len());
        let mut section = None;
        for ((order, heading), _, line) in lines {
            if section != Some(order) {
                section = Some(order);
                text.push(heading.to_string());
            }
            text.push(format!("  {}", line));
        }
        text.join("\n")
    }

    /// Executes the plan in dependency order.
    ///
    /// # Panics
    ///
    /// Panics if the graph contains a cycle (it never drains) or if the
    /// result counters do not add up at the end.
    #[instrument(skip_all, fields(nodes = self.nodes.len()))]
    pub async fn apply(
        &self,
        apply_fn: ApplyFunction,
        updater: Arc<ApplyResultUpdater>,
        event_log: &mut EventLog,
    ) -> ApplyResult {
        updater.set_total(self.number_of_actions());
        let node_count = self.nodes.len();
        if node_count == 0 {
            return updater.done();
        }

        let nodes = Arc::new(self.nodes.clone());
        let progress = Arc::new(Mutex::new(Progress {
            degree: nodes
                .iter()
                .map(|(key, node)| (key.clone(), node.before.len()))
                .collect(),
            upstream_failed: HashSet::new(),
        }));
        let log = Arc::new(Mutex::new(EventLog::new("plan")));

        let (ready_tx, mut ready_rx) = mpsc::channel::<String>(node_count);
        for (key, node) in nodes.iter() {
            if node.before.is_empty() {
                enqueue(&ready_tx, key);
            }
        }

        let mut running = JoinSet::new();
        let mut finished = 0;
        loop {
            while let Ok(key) = ready_rx.try_recv() {
                running.spawn(run_node(NodeRun {
                    key,
                    nodes: nodes.clone(),
                    progress: progress.clone(),
                    apply_fn: apply_fn.clone(),
                    updater: updater.clone(),
                    ready: ready_tx.clone(),
                    log: log.clone(),
                }));
            }
            if finished == node_count {
                break;
            }

            match running.join_next().await {
                Some(Ok(())) => finished += 1,
                Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Some(Err(e)) => panic!("action graph node task cancelled: {}", e),
                None => panic!(
                    "action graph did not drain: {} of {} nodes finished, the rest form a cycle",
                    finished, node_count
                ),
            }
        }

        let mut log = log.lock().await;
        event_log.append(std::mem::replace(&mut *log, EventLog::silent("plan")));

        let result = updater.done();
        debug!(
            success = result.success,
            failed = result.failed,
            skipped = result.skipped,
            "Plan applied"
        );
        result
    }
}

struct Progress {
    degree: HashMap<String, usize>,
    upstream_failed: HashSet<String>,
}

struct NodeRun {
    key: String,
    nodes: Arc<BTreeMap<String, GraphNode>>,
    progress: Arc<Mutex<Progress>>,
    apply_fn: ApplyFunction,
    updater: Arc<ApplyResultUpdater>,
    ready: mpsc::Sender<String>,
    log: Arc<Mutex<EventLog>>,
}

async fn run_node(run: NodeRun) {
    let Some(node) = run.nodes.get(&run.key) else {
        panic!("action graph node '{}' disappeared", run.key);
    };

    let mut failed = run.progress.lock().await.upstream_failed.contains(&run.key);
    if failed {
        debug!(key = %run.key, "Skipping node after upstream failure");
    }

    for action in &node.actions {
        if failed {
            run.updater.add_skipped();
            run.log.lock().await.with_fields(
                EventSeverity::Warn,
                "Action skipped",
                [("action", action.name())],
            );
            continue;
        }

        let outcome = AssertUnwindSafe(async { (run.apply_fn)(action.clone()).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ApplyError::Panic(panic_message(payload))));

        match outcome {
            Ok(()) => run.updater.add_success(),
            Err(e) => {
                failed = true;
                run.updater.add_failed();
                warn!(action = %action.name(), error = %e, "Action failed");
                run.log.lock().await.with_fields(
                    EventSeverity::Error,
                    "Action failed",
                    [("action", action.name()), ("error", e.to_string())],
                );
            }
        }
    }

    let mut progress = run.progress.lock().await;
    for next in &node.before_rev {
        if failed {
            progress.upstream_failed.insert(next.clone());
        }
        let Some(degree) = progress.degree.get_mut(next) else {
            panic!("action graph node '{}' has no in-degree", next);
        };
        if *degree == 0 {
            panic!("negative in-degree for action graph node '{}'", next);
        }
        *degree -= 1;
        if *degree == 0 {
            enqueue(&run.ready, next);
        }
    }
}

fn enqueue(ready: &mpsc::Sender<String>, key: &str) {
    if ready.try_send(key.to_string()).is_err() {
        panic!("ready queue rejected action graph node '{}'", key);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
