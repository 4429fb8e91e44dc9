//! Resolution of a single claim: a recursive walk over contracts and services

use crate::error::{ResolveError, Result};
use crate::external::ExternalData;
use crate::key::ComponentInstanceKey;
use crate::resolution::PolicyResolution;
use keel_types::criteria;
use keel_types::{
    Claim, Cluster, Context, Contract, EventLog, EventSeverity, ExpressionCache,
    ExpressionParams, LabelOperations, LabelSet, NestedParameterMap, Policy, RuleActionResult,
    Target, TemplateCache, User,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label holding the deployment target, `[namespace/]cluster[.suffix]`
pub const TARGET_LABEL: &str = "target";

/// State shared by all resolver workers
pub(crate) struct ResolverShared {
    pub policy: Arc<Policy>,
    pub external: ExternalData,
    pub expressions: ExpressionCache,
    pub templates: TemplateCache,
}

/// What a worker hands back after resolving one claim
pub(crate) struct ClaimOutcome {
    pub resolution: PolicyResolution,
    pub result: Result<ComponentInstanceKey>,
    pub event_log: EventLog,
}

/// Context passed down into every recursive call
#[derive(Debug, Clone)]
struct NodeContext {
    depth: usize,
    namespace: String,
    contract: String,
    labels: LabelSet,
    /// Service keys visited so far
    path: Vec<String>,
    /// Key we arrived from, used to store graph edges
    arrival_key: Option<ComponentInstanceKey>,
}

struct NodeOutcome {
    service_key: ComponentInstanceKey,
    /// Discovery subtree announced by the service components
    discovery: NestedParameterMap,
}

/// The service a context resolved to, with everything needed to build keys
struct Placement<'p> {
    contract: &'p Contract,
    context: &'p Context,
    cluster: &'p Cluster,
    target: Target,
    allocation_keys: Vec<String>,
}

impl Placement<'_> {
    fn key(&self, component: Option<&keel_types::Component>) -> ComponentInstanceKey {
        ComponentInstanceKey::new(
            self.cluster,
            &self.target.suffix,
            self.contract,
            self.context,
            &self.allocation_keys,
            component,
        )
    }
}

impl ResolverShared {
    pub(crate) fn resolve_claim(&self, claim: &Claim) -> ClaimOutcome {
        let claim_id = claim.id();
        let mut log = EventLog::new("resolve");
        log.attach_to(claim_id.clone());
        log.with_fields(
            EventSeverity::Debug,
            "Resolving claim",
            [
                ("claim_id", claim_id.clone()),
                ("contract", claim.contract.clone()),
            ],
        );

        let Some(user) = self.external.users.load_user_by_id(&claim.user) else {
            let err = ResolveError::UserNotFound(claim.user.clone());
            log.with_fields(
                EventSeverity::Warn,
                format!("Cannot resolve claim: {}", err),
                [("claim_id", claim_id)],
            );
            return ClaimOutcome {
                resolution: PolicyResolution::new(),
                result: Err(err),
                event_log: log,
            };
        };
        let secrets = self.external.secrets.load_secrets_by_user_name(&user.name);

        let mut labels = LabelSet::new(claim.labels.clone());
        labels.add_labels(&user.labels);

        let mut walk = ClaimWalk {
            shared: self,
            claim,
            claim_id: claim_id.clone(),
            user,
            secrets,
            resolution: PolicyResolution::new(),
            log,
        };
        let root = NodeContext {
            depth: 0,
            namespace: claim.namespace().to_string(),
            contract: claim.contract.clone(),
            labels,
            path: Vec::new(),
            arrival_key: None,
        };

        let result = walk.resolve_node(root).map(|outcome| outcome.service_key);
        match &result {
            Ok(key) => walk.log.with_fields(
                EventSeverity::Info,
                "Claim resolved",
                [("claim_id", claim_id), ("key", key.to_string())],
            ),
            Err(err) => walk.log.with_fields(
                EventSeverity::Warn,
                format!("Cannot resolve claim: {}", err),
                [("claim_id", claim_id)],
            ),
        }

        ClaimOutcome {
            resolution: walk.resolution,
            result,
            event_log: walk.log,
        }
    }
}

struct ClaimWalk<'a> {
    shared: &'a ResolverShared,
    claim: &'a Claim,
    claim_id: String,
    user: User,
    secrets: BTreeMap<String, String>,
    resolution: PolicyResolution,
    log: EventLog,
}

impl<'a> ClaimWalk<'a> {
    fn resolve_node(&mut self, node: NodeContext) -> Result<NodeOutcome> {
        let shared = self.shared;

        let contract = shared
            .policy
            .get_contract(&node.contract, &node.namespace)?
            .ok_or_else(|| ResolveError::ContractNotFound(node.contract.clone()))?;
        let namespace = contract.namespace();
        self.log.with_fields(
            EventSeverity::Debug,
            "Contract found",
            [("contract", contract.metadata.locator())],
        );

        let mut labels = node.labels;
        self.transform_labels(&mut labels, &contract.change_labels);

        let context = self.match_context(contract, &labels)?;
        let allocation = context
            .allocation
            .as_ref()
            .ok_or_else(|| ResolveError::NoAllocation {
                contract: contract.metadata.locator(),
                context: context.name.clone(),
            })?;

        let service = shared
            .policy
            .get_service(&allocation.service, namespace)?
            .ok_or_else(|| ResolveError::ServiceNotFound(allocation.service.clone()))?;
        if service.namespace() != contract.namespace() {
            return Err(ResolveError::ServiceNamespaceMismatch {
                service: service.metadata.locator(),
                contract: contract.metadata.locator(),
            });
        }
        if !shared.policy.acl().can_consume(&self.user, service.namespace())? {
            return Err(ResolveError::ConsumeDenied {
                user: self.user.id.clone(),
                service: service.metadata.locator(),
            });
        }

        self.transform_labels(&mut labels, &context.change_labels);

        let allocation_keys =
            context.resolve_keys(&self.allocation_data(&labels), &shared.templates)?;

        let rules = self.process_rules(namespace, labels)?;
        let labels = rules.labels.clone();

        let target_label = labels.get(TARGET_LABEL).ok_or(ResolveError::TargetNotSet)?;
        let target = Target::parse(target_label)?;
        let cluster = shared
            .policy
            .find_cluster(&target, namespace)
            .ok_or_else(|| ResolveError::ClusterNotFound(target_label.to_string()))?;

        let placement = Placement {
            contract,
            context,
            cluster,
            target,
            allocation_keys,
        };
        let service_key = placement.key(None);

        let mut path = node.path;
        let cycle = path.iter().any(|k| k == service_key.as_str());
        path.push(service_key.to_string());
        if cycle {
            return Err(ResolveError::ServiceCycle(path));
        }

        self.resolution.record_labels(&service_key, &labels);
        self.resolution
            .store_edge(node.arrival_key.as_ref(), &service_key);

        let components = service.components_sorted()?;
        let mut discovery_tree = NestedParameterMap::new();

        for component in components {
            let params = ExpressionParams::new(labels.labels.clone());
            if !criteria::matches(component.criteria.as_ref(), &params, &shared.expressions)? {
                self.log.with_fields(
                    EventSeverity::Debug,
                    "Component criteria not matched",
                    [("component", component.name.clone())],
                );
                continue;
            }

            let key = placement.key(Some(component));
            self.resolution.store_edge(Some(&service_key), &key);
            self.resolution.record_labels(&key, &labels);

            let data = self.code_discovery_data(&labels, &discovery_tree, &key);
            let discovery = shared.templates.evaluate_tree(&component.discovery, &data)?;
            self.resolution
                .record_discovery_params(&key, discovery.clone())?;

            let mut announced = discovery;
            announced.insert("instance".to_string(), Value::String(key.deploy_name()));

            if let Some(code) = &component.code {
                let code_params = shared.templates.evaluate_tree(&code.params, &data)?;
                self.resolution
                    .record_code_params(&key, &code.code_type, code_params)?;
            } else if let Some(contract_ref) = &component.contract {
                let child = NodeContext {
                    depth: node.depth + 1,
                    namespace: namespace.to_string(),
                    contract: contract_ref.clone(),
                    labels: labels.clone(),
                    path: path.clone(),
                    arrival_key: Some(key.clone()),
                };
                let outcome = self.resolve_node(child)?;
                announced.extend(outcome.discovery);
            }

            discovery_tree.insert(component.name.clone(), Value::Object(announced));
            self.resolution
                .record_resolved(&key, &self.claim_id, node.depth, &rules);
            self.log.with_fields(
                EventSeverity::Debug,
                "Component instance resolved",
                [("key", key.to_string())],
            );
        }

        self.resolution
            .record_resolved(&service_key, &self.claim_id, node.depth, &rules);

        Ok(NodeOutcome {
            service_key,
            discovery: discovery_tree,
        })
    }

    fn match_context<'p>(&mut self, contract: &'p Contract, labels: &LabelSet) -> Result<&'p Context> {
        let params = ExpressionParams::new(labels.labels.clone());
        for context in &contract.contexts {
            let matched = context.matches(&params, &self.shared.expressions)?;
            if matched {
                self.log.with_fields(
                    EventSeverity::Debug,
                    "Context matched",
                    [("context", context.name.clone())],
                );
                return Ok(context);
            }
        }
        Err(ResolveError::ContextNotMatched(contract.metadata.locator()))
    }

    /// Applies namespace and system rules in order of weight
    fn process_rules(&mut self, namespace: &str, labels: LabelSet) -> Result<RuleActionResult> {
        let shared = self.shared;
        let mut result = RuleActionResult::new(labels);

        for rule in shared.policy.rules_for(namespace) {
            let params = ExpressionParams::new(result.labels.labels.clone());
            if !rule.matches(&params, &shared.expressions)? {
                continue;
            }
            rule.apply_actions(&mut result);
            self.log.with_fields(
                EventSeverity::Debug,
                "Rule matched",
                [("rule", rule.metadata.locator())],
            );

            if !result.allow_claim {
                return Err(ResolveError::RejectedByRules(self.claim_id.clone()));
            }
            if rule.actions.stop {
                break;
            }
        }

        Ok(result)
    }

    fn transform_labels(&mut self, labels: &mut LabelSet, ops: &LabelOperations) {
        if labels.apply_transform(ops) {
            self.log.debug(format!("Labels after transform: {:?}", labels.labels));
        }
    }

    fn user_data(&self) -> Value {
        json!({
            "Name": self.user.name,
            "Labels": self.user.labels,
            "Secrets": self.secrets,
        })
    }

    fn allocation_data(&self, labels: &LabelSet) -> Value {
        json!({
            "User": self.user_data(),
            "Claim": {
                "ID": self.claim_id,
                "Name": self.claim.metadata.name,
                "Namespace": self.claim.metadata.namespace,
            },
            "Labels": labels.labels,
        })
    }

    fn code_discovery_data(
        &self,
        labels: &LabelSet,
        tree: &NestedParameterMap,
        key: &ComponentInstanceKey,
    ) -> Value {
        let mut discovery = tree.clone();
        discovery.insert("Instance".to_string(), Value::String(key.deploy_name()));
        discovery.insert("InstanceId".to_string(), Value::String(key.instance_id()));
        if key.is_component() {
            let parent = key.parent_service_key();
            discovery.insert(
                "Service".to_string(),
                json!({
                    "Instance": parent.deploy_name(),
                    "InstanceId": parent.instance_id(),
                }),
            );
        }

        json!({
            "User": self.user_data(),
            "Labels": labels.labels,
            "Discovery": Value::Object(discovery),
            "Target": {
                "Namespace": key.target_suffix(),
                "Suffix": key.target_suffix(),
            },
        })
    }
}
