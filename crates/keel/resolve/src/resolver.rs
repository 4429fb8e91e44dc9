//! Policy resolver: turns every claim of a policy into component instances
//!
//! Claims are resolved in parallel on blocking worker threads, bounded by a
//! semaphore. Each worker builds a private [`PolicyResolution`] and deposits
//! it under a lock; once all workers are done the outcomes are merged in claim
//! declaration order so the resulting processing order is deterministic.

use crate::config::ResolverConfig;
use crate::error::{ResolveError, Result};
use crate::external::ExternalData;
use crate::instance::ComponentInstance;
use crate::node::{ClaimOutcome, ResolverShared};
use crate::resolution::{ClaimResolution, PolicyResolution};
use keel_types::{Claim, EventLog, ExpressionCache, Policy, TemplateCache};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinError;
use tracing::{info, instrument, warn};

/// Resolves claims of a policy into a [`PolicyResolution`]
pub struct PolicyResolver {
    shared: Arc<ResolverShared>,
    config: ResolverConfig,
}

impl PolicyResolver {
    /// Creates a resolver. The policy is expected to be valid.
    pub fn new(policy: Arc<Policy>, external: ExternalData) -> Self {
        Self {
            shared: Arc::new(ResolverShared {
                policy,
                external,
                expressions: ExpressionCache::new(),
                templates: TemplateCache::new(),
            }),
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.shared.policy
    }

    /// Resolves all claims declared in the policy.
    ///
    /// Failures are recorded per claim and never abort the resolution.
    #[instrument(skip(self, event_log))]
    pub async fn resolve(&self, event_log: &mut EventLog) -> PolicyResolution {
        let claims: Vec<Claim> = self.shared.policy.claims().cloned().collect();
        let semaphore = Arc::new(Semaphore::new(self.config.workers()));
        let slots: Arc<Mutex<Vec<Option<ClaimOutcome>>>> =
            Arc::new(Mutex::new(claims.iter().map(|_| None).collect()));

        let mut handles = Vec::with_capacity(claims.len());
        for (index, claim) in claims.iter().cloned().enumerate() {
            let permit = semaphore.clone().acquire_owned().await.ok();
            let shared = self.shared.clone();
            let slots = slots.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let outcome = shared.resolve_claim(&claim);
                slots.blocking_lock()[index] = Some(outcome);
            }));
        }

        let mut panics = BTreeMap::new();
        for (index, handle) in handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                panics.insert(index, panic_message(err));
            }
        }

        let outcomes = std::mem::take(&mut *slots.lock().await);
        let resolution = combine(&claims, outcomes, panics, event_log);

        let resolved = resolution
            .claims()
            .values()
            .filter(|c| c.is_resolved())
            .count();
        info!(
            claims = claims.len(),
            resolved,
            failed = claims.len() - resolved,
            instances = resolution.len(),
            "Policy resolved"
        );
        resolution
    }
}

/// Merges per-claim outcomes in declaration order.
///
/// Claims computing different code or discovery params for the same instance
/// all fail; the rest get merged.
fn combine(
    claims: &[Claim],
    mut outcomes: Vec<Option<ClaimOutcome>>,
    mut panics: BTreeMap<usize, String>,
    event_log: &mut EventLog,
) -> PolicyResolution {
    let mut conflicts = find_conflicts(&outcomes);
    let mut resolution = PolicyResolution::new();

    for (index, claim) in claims.iter().enumerate() {
        let claim_id = claim.id();
        let status = match outcomes.get_mut(index).and_then(Option::take) {
            None => {
                let reason = panics
                    .remove(&index)
                    .unwrap_or_else(|| "worker did not report an outcome".to_string());
                let err = ResolveError::Panic(reason);
                warn!(claim_id = %claim_id, error = %err, "Claim resolution panicked");
                event_log.error(format!("Cannot resolve claim '{}': {}", claim_id, err));
                ClaimResolution::failed(err)
            }
            Some(outcome) => {
                let status = match (outcome.result, conflicts.remove(&index)) {
                    (Err(err), _) | (Ok(_), Some(err)) => ClaimResolution::failed(err),
                    (Ok(key), None) => match merge_claim(&mut resolution, &outcome.resolution) {
                        Ok(()) => ClaimResolution::resolved(&key),
                        Err(err) => ClaimResolution::failed(err),
                    },
                };
                event_log.append(outcome.event_log);
                status
            }
        };

        if let Some(err) = &status.error {
            event_log.warn(format!("Claim '{}' not resolved: {}", claim_id, err));
        }
        resolution.record_claim(claim_id, status);
    }

    resolution
}

/// Merges one claim's instances all or nothing
fn merge_claim(resolution: &mut PolicyResolution, claim: &PolicyResolution) -> Result<()> {
    let mut merged = resolution.clone();
    merged.append(claim)?;
    *resolution = merged;
    Ok(())
}

/// Finds claims that disagree with another claim on an instance's params
fn find_conflicts(outcomes: &[Option<ClaimOutcome>]) -> HashMap<usize, ResolveError> {
    let mut first_seen: HashMap<&str, &ComponentInstance> = HashMap::new();
    let mut contributors: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut conflicting: BTreeMap<&str, ResolveError> = BTreeMap::new();

    for (index, outcome) in outcomes.iter().enumerate() {
        let Some(outcome) = outcome else { continue };
        if outcome.result.is_err() {
            continue;
        }
        for instance in outcome.resolution.instances() {
            let key = instance.key.as_str();
            contributors.entry(key).or_default().push(index);
            match first_seen.get(key) {
                None => {
                    first_seen.insert(key, instance);
                }
                Some(first) => {
                    if let Some(err) = params_conflict(first, instance) {
                        conflicting.entry(key).or_insert(err);
                    } else if first.calculated_code_params.is_empty()
                        && !instance.calculated_code_params.is_empty()
                    {
                        first_seen.insert(key, instance);
                    }
                }
            }
        }
    }

    let mut failed = HashMap::new();
    for (key, err) in conflicting {
        for index in contributors.remove(key).unwrap_or_default() {
            failed.entry(index).or_insert_with(|| err.clone());
        }
    }
    failed
}

/// Same rule as [`ComponentInstance::add_code_params`]: an empty map means
/// the claim computed nothing for that side and is compatible with any other
/// map, while two different non-empty maps or code types conflict.
fn params_conflict(a: &ComponentInstance, b: &ComponentInstance) -> Option<ResolveError> {
    let differ = |x: &keel_types::NestedParameterMap, y: &keel_types::NestedParameterMap| {
        !x.is_empty() && !y.is_empty() && x != y
    };
    let code_types_differ = matches!(
        (&a.code_type, &b.code_type),
        (Some(x), Some(y)) if x != y
    );
    if code_types_differ || differ(&a.calculated_code_params, &b.calculated_code_params) {
        return Some(ResolveError::ConflictingCodeParams(a.key.to_string()));
    }
    if differ(&a.calculated_discovery, &b.calculated_discovery) {
        return Some(ResolveError::ConflictingDiscoveryParams(a.key.to_string()));
    }
    None
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
