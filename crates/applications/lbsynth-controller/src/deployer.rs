//! Whole-stack synthesis
//!
//! ## Pass order
//!
//! 1. Load balancers
//! 2. Target groups
//! 3. Listeners (need load balancer ARNs)
//! 4. Listener rules (need listener and target group ARNs)
//! 5. Target group bindings (need target group ARNs)
//! 6. Sweep: deletes deferred because the resource was still referenced are
//!    retried once, now that listeners and rules have moved off them
//!
//! Each kind writes its statuses back onto the stack before the next kind
//! resolves references against it.

use crate::config::{ControllerConfig, FeatureFlags};
use crate::metrics::ResourceMetrics;
use crate::model::{Stack, StackId};
use crate::poll::Poller;
use crate::synth::{
    BindingSynthesizer, DeferredDelete, KindReport, ListenerRuleSynthesizer, ListenerSynthesizer,
    LoadBalancerSynthesizer, SynthContext, TargetGroupSynthesizer, retry_deferred,
};
use crate::tagging::TaggingGateway;
use crate::tracking::{RESOURCE_TAG_KEY, TrackingProvider};
use chrono::{DateTime, Utc};
use lbsynth_core::{
    BindingApi, LoadBalancingApi, ResourceKind, Result, ResultExt, SynthError, Tags,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one pass over a stack
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub stack: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub kinds: Vec<KindReport>,
    /// Deletes still blocked after the sweep
    pub deferred: Vec<DeferredDelete>,
}

impl DeployReport {
    pub fn kind(&self, kind: ResourceKind) -> Option<&KindReport> {
        self.kinds.iter().find(|report| report.kind == kind)
    }

    /// Resources created, updated or deleted
    pub fn mutations(&self) -> usize {
        self.kinds
            .iter()
            .map(|k| k.created + k.updated + k.deleted)
            .sum()
    }

    /// Nothing is left for a later pass
    pub fn is_converged(&self) -> bool {
        self.deferred.is_empty()
    }
}

/// A live resource owned by a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryEntry {
    pub kind: ResourceKind,
    /// Logical id from the tracking tag
    pub resource_id: Option<String>,
    pub arn: String,
    pub name: String,
}

/// Synthesizes stacks against one VPC
pub struct StackDeployer {
    api: Arc<dyn LoadBalancingApi>,
    bindings: Option<Arc<dyn BindingApi>>,
    gateway: TaggingGateway,
    tracking: TrackingProvider,
    metrics: ResourceMetrics,
    features: FeatureFlags,
    poller: Poller,
    vpc_id: String,
}

impl StackDeployer {
    /// Create a deployer; fails on an invalid configuration
    pub fn new(
        api: Arc<dyn LoadBalancingApi>,
        config: &ControllerConfig,
        metrics: ResourceMetrics,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            gateway: TaggingGateway::new(api.clone(), &config.vpc_id, config.tag_chunk_size),
            tracking: TrackingProvider::new(config),
            api,
            bindings: None,
            metrics,
            features: config.features,
            poller: Poller::from_settings(&config.polling),
            vpc_id: config.vpc_id.clone(),
        })
    }

    /// Enable target group binding synthesis
    pub fn with_bindings(mut self, bindings: Arc<dyn BindingApi>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    fn context<'a>(&'a self, stack: &'a Stack) -> SynthContext<'a> {
        SynthContext {
            api: self.api.as_ref(),
            bindings: self.bindings.as_deref(),
            gateway: &self.gateway,
            tracking: &self.tracking,
            metrics: &self.metrics,
            features: self.features,
            poller: self.poller,
            vpc_id: &self.vpc_id,
            stack,
        }
    }

    /// Run one synthesis pass over `stack`
    pub async fn deploy(&self, stack: &Stack) -> Result<DeployReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        stack.validate()?;
        info!(
            stack = %stack.id,
            resources = stack.resource_count(),
            "Synthesizing stack"
        );

        let ctx = self.context(stack);
        let mut kinds = vec![
            LoadBalancerSynthesizer::new(&ctx)
                .run()
                .await
                .with_context(|| "synthesizing load balancers")?,
            TargetGroupSynthesizer::new(&ctx)
                .run()
                .await
                .with_context(|| "synthesizing target groups")?,
            ListenerSynthesizer::new(&ctx)
                .run()
                .await
                .with_context(|| "synthesizing listeners")?,
            ListenerRuleSynthesizer::new(&ctx)
                .run()
                .await
                .with_context(|| "synthesizing listener rules")?,
        ];

        // Without a cluster API there is nothing to list, so bindings are
        // only synthesized when the stack asks for some
        if ctx.bindings.is_some() || !stack.target_group_bindings.is_empty() {
            kinds.push(
                BindingSynthesizer::new(&ctx)?
                    .run()
                    .await
                    .with_context(|| "synthesizing target group bindings")?,
            );
        }

        let deferred: Vec<DeferredDelete> = kinds
            .iter()
            .flat_map(|k| k.deferred.iter().cloned())
            .collect();
        let deferred = if deferred.is_empty() {
            deferred
        } else {
            info!(count = deferred.len(), "Retrying deferred deletes");
            retry_deferred(&ctx, deferred)
                .await
                .with_context(|| "retrying deferred deletes")?
        };

        let report = DeployReport {
            stack: stack.id.to_string(),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            kinds,
            deferred,
        };

        if report.is_converged() {
            info!(
                stack = %stack.id,
                mutations = report.mutations(),
                duration_ms = report.duration_ms,
                "Stack synthesized"
            );
        } else {
            warn!(
                stack = %stack.id,
                blocked = report.deferred.len(),
                "Stack synthesized with deletes still blocked"
            );
        }

        Ok(report)
    }

    /// Run one pass, giving up after `deadline`. Mutations already issued are
    /// not rolled back.
    pub async fn deploy_with_deadline(&self, stack: &Stack, deadline: Duration) -> Result<DeployReport> {
        match tokio::time::timeout(deadline, self.deploy(stack)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(stack = %stack.id, deadline_ms = deadline.as_millis() as u64, "Pass deadline exceeded");
                Err(SynthError::Cancelled(deadline))
            }
        }
    }

    /// Live load balancers, target groups and listeners owned by a stack
    pub async fn inventory(&self, stack: &StackId) -> Result<Vec<InventoryEntry>> {
        let filters = self.tracking.stack_tag_filters(stack);
        let mut entries = Vec::new();

        let load_balancers = self.gateway.list_load_balancers(&filters).await?;
        for lb in &load_balancers {
            entries.push(entry(ResourceKind::LoadBalancer, &lb.tags, &lb.resource.arn, &lb.resource.name));

            let listeners = self.api.describe_listeners(&lb.resource.arn).await?;
            let arns: Vec<String> = listeners.iter().map(|l| l.arn.clone()).collect();
            let tags = self.gateway.fetch_tags(&arns).await?;
            for listener in &listeners {
                let listener_tags = tags.get(&listener.arn).cloned().unwrap_or_default();
                let name = format!("{}:{}", lb.resource.name, listener.settings.port);
                entries.push(entry(ResourceKind::Listener, &listener_tags, &listener.arn, &name));
            }
        }

        for tg in self.gateway.list_target_groups(&filters).await? {
            entries.push(entry(ResourceKind::TargetGroup, &tg.tags, &tg.resource.arn, &tg.resource.name));
        }

        Ok(entries)
    }
}

fn entry(kind: ResourceKind, tags: &Tags, arn: &str, name: &str) -> InventoryEntry {
    InventoryEntry {
        kind,
        resource_id: tags.get(RESOURCE_TAG_KEY).cloned(),
        arn: arn.to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeBindings, FakeCloud, binding_spec, fast_poller, forward_to, listener_spec,
        load_balancer_spec, rule_spec, target_group_spec, test_config,
    };
    use lbsynth_core::StringToken;

    fn deployer(cloud: &Arc<FakeCloud>, bindings: &Arc<FakeBindings>) -> StackDeployer {
        StackDeployer::new(cloud.clone(), &test_config(), ResourceMetrics::new())
            .unwrap()
            .with_bindings(bindings.clone())
            .with_poller(fast_poller())
    }

    fn lb_ref() -> StringToken {
        StringToken::reference(ResourceKind::LoadBalancer, "lb")
    }

    fn full_stack() -> Stack {
        let mut listener = listener_spec(lb_ref(), 80);
        listener.default_actions = vec![forward_to("tg")];

        Stack::new(StackId::namespaced("default", "web"))
            .with_load_balancer("lb", load_balancer_spec("k8s-web"))
            .with_target_group("tg", target_group_spec("k8s-web-tg"))
            .with_listener("http", listener)
            .with_listener_rule(
                "api",
                rule_spec(
                    StringToken::reference(ResourceKind::Listener, "http"),
                    10,
                    "/api/*",
                    forward_to("tg"),
                ),
            )
            .with_target_group_binding(
                "tgb",
                binding_spec("web-tgb", StringToken::reference(ResourceKind::TargetGroup, "tg")),
            )
    }

    #[tokio::test]
    async fn test_full_pass_is_idempotent() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        let deployer = deployer(&cloud, &bindings);

        let report = deployer.deploy(&full_stack()).await.unwrap();
        assert_eq!(report.mutations(), 5);
        assert!(report.is_converged());

        let tg_arn = cloud.target_group_names();
        assert_eq!(tg_arn, vec!["k8s-web-tg".to_string()]);

        cloud.clear_calls();
        let report = deployer.deploy(&full_stack()).await.unwrap();

        assert_eq!(report.mutations(), 0);
        assert!(cloud.mutating_calls().is_empty());
        assert_eq!(bindings.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_binding_resolves_target_group_arn() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        let stack = full_stack();

        deployer(&cloud, &bindings).deploy(&stack).await.unwrap();

        let tg_arn = stack.target_groups[0].status().unwrap().arn;
        let object = bindings.object("default", "web-tgb").unwrap();
        assert_eq!(object.spec.target_group_arn, tg_arn);
    }

    #[tokio::test]
    async fn test_in_use_target_group_deleted_by_sweep() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        let deployer = deployer(&cloud, &bindings);

        let stack_forwarding_to = |tg: &str, name: &str| {
            let mut listener = listener_spec(lb_ref(), 80);
            listener.default_actions = vec![forward_to(tg)];
            Stack::new(StackId::new("web"))
                .with_load_balancer("lb", load_balancer_spec("k8s-web"))
                .with_target_group(tg, target_group_spec(name))
                .with_listener("http", listener)
        };

        deployer.deploy(&stack_forwarding_to("old", "k8s-old")).await.unwrap();

        let report = deployer
            .deploy(&stack_forwarding_to("new", "k8s-new"))
            .await
            .unwrap();

        let target_groups = report.kind(ResourceKind::TargetGroup).unwrap();
        assert_eq!(target_groups.deferred.len(), 1);
        assert_eq!(target_groups.deferred[0].name, "k8s-old");
        assert!(report.is_converged());
        assert_eq!(cloud.target_group_names(), vec!["k8s-new".to_string()]);
    }

    #[tokio::test]
    async fn test_deadline_cancels_pass() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        cloud.set_latency(Duration::from_millis(50));

        let err = deployer(&cloud, &bindings)
            .deploy_with_deadline(&full_stack(), Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, SynthError::Cancelled(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_cloud_error_surfaces_with_context() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        cloud.fail_next("CreateTargetGroup", "Throttling");

        let err = deployer(&cloud, &bindings)
            .deploy(&full_stack())
            .await
            .unwrap_err();

        assert_eq!(err.cloud_error().map(|e| e.code.as_str()), Some("Throttling"));
        assert_eq!(err.to_string(), "synthesizing target groups");
        assert_eq!(cloud.call_count("CreateListener"), 0);
    }

    #[tokio::test]
    async fn test_bindings_without_cluster_api_rejected() {
        let cloud = Arc::new(FakeCloud::new());
        let deployer = StackDeployer::new(cloud.clone(), &test_config(), ResourceMetrics::new())
            .unwrap()
            .with_poller(fast_poller());

        let err = deployer.deploy(&full_stack()).await.unwrap_err();
        assert!(matches!(err, SynthError::Config(_)));
    }

    #[tokio::test]
    async fn test_inventory_lists_owned_resources() {
        let cloud = Arc::new(FakeCloud::new());
        let bindings = Arc::new(FakeBindings::new());
        let deployer = deployer(&cloud, &bindings);
        deployer.deploy(&full_stack()).await.unwrap();

        let entries = deployer
            .inventory(&StackId::namespaced("default", "web"))
            .await
            .unwrap();
        let ids: Vec<(ResourceKind, Option<&str>)> = entries
            .iter()
            .map(|e| (e.kind, e.resource_id.as_deref()))
            .collect();

        assert_eq!(
            ids,
            vec![
                (ResourceKind::LoadBalancer, Some("lb")),
                (ResourceKind::Listener, Some("http")),
                (ResourceKind::TargetGroup, Some("tg")),
            ]
        );

        let other = deployer.inventory(&StackId::new("other")).await.unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cloud = Arc::new(FakeCloud::new());
        let config = ControllerConfig::new("", "vpc-1");
        assert!(StackDeployer::new(cloud, &config, ResourceMetrics::new()).is_err());
    }
}
