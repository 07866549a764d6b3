//! Per-kind synthesis
//!
//! ## Pass shape (one kind)
//!
//! 1. Match desired resources to live ones
//! 2. Demote matches with immutable drift into delete + create
//! 3. Delete live-only resources (not-found is success, in-use is deferred)
//! 4. Create desired-only resources and write their status back
//! 5. Update matched resources one by one; a failure on one resource does not
//!    stop the others, and the first failure is returned afterwards
//!
//! The kinds themselves only supply identity, CRUD and the replacement check
//! through [`ResourceSynthesizer`].

pub mod binding;
pub mod listener;
pub mod listener_rule;
pub mod load_balancer;
pub mod target_group;

pub use binding::BindingSynthesizer;
pub use listener::ListenerSynthesizer;
pub use listener_rule::ListenerRuleSynthesizer;
pub use load_balancer::LoadBalancerSynthesizer;
pub use target_group::TargetGroupSynthesizer;

use crate::config::FeatureFlags;
use crate::matcher::MatchResult;
use crate::metrics::ResourceMetrics;
use crate::model::Stack;
use crate::poll::Poller;
use crate::tagging::TaggingGateway;
use crate::tracking::TrackingProvider;
use async_trait::async_trait;
use lbsynth_core::{
    Action, BindingApi, LoadBalancingApi, ResourceKind, Result, SynthError, WeightedTargetGroup,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Everything one pass over one stack needs
pub struct SynthContext<'a> {
    pub api: &'a dyn LoadBalancingApi,
    pub bindings: Option<&'a dyn BindingApi>,
    pub gateway: &'a TaggingGateway,
    pub tracking: &'a TrackingProvider,
    pub metrics: &'a ResourceMetrics,
    pub features: FeatureFlags,
    pub poller: Poller,
    pub vpc_id: &'a str,
    pub stack: &'a Stack,
}

impl SynthContext<'_> {
    pub(crate) fn mark_present(&self, name: &str, kind: ResourceKind) {
        self.metrics.mark_present(&self.stack.id, name, kind.as_str());
    }

    pub(crate) fn mark_deleted(&self, name: &str, kind: ResourceKind) {
        self.metrics.mark_deleted(&self.stack.id, name, kind.as_str());
    }
}

/// A delete that failed because the resource is still referenced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredDelete {
    pub kind: ResourceKind,
    /// ARN, or `namespace/name` for bindings
    pub arn: String,
    /// Cloud resource name used in metrics
    pub name: String,
}

/// Outcome of synthesizing one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub kind: ResourceKind,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub replaced: usize,
    pub deferred: Vec<DeferredDelete>,
}

impl KindReport {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            replaced: 0,
            deferred: Vec::new(),
        }
    }

    /// Fold another report of the same kind into this one
    pub fn merge(&mut self, other: KindReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.replaced += other.replaced;
        self.deferred.extend(other.deferred);
    }
}

/// Kind-specific half of a synthesizer
#[async_trait]
pub trait ResourceSynthesizer: Send + Sync {
    type Desired: Sync;
    type Live: Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// Logical id of a desired resource
    fn desired_id<'d>(&self, desired: &'d Self::Desired) -> &'d str;

    /// ARN (or object key) of a live resource
    fn live_id<'l>(&self, live: &'l Self::Live) -> &'l str;

    /// Whether a matched pair must be replaced rather than updated
    fn requires_replacement(&self, _live: &Self::Live, _desired: &Self::Desired) -> bool {
        false
    }

    /// Create the resource and write its status
    async fn create(&self, desired: &Self::Desired) -> Result<()>;

    /// Converge a matched resource; returns whether anything was modified
    async fn update(&self, live: &Self::Live, desired: &Self::Desired) -> Result<bool>;

    async fn delete(&self, live: &Self::Live) -> Result<()>;

    /// Record a delete that could not happen yet
    fn deferred(&self, live: &Self::Live) -> DeferredDelete;

    /// Called once the live resource is known to be gone
    fn on_deleted(&self, _live: &Self::Live) {}
}

/// Run delete, create and update phases for one kind
pub async fn synthesize<'d, S>(
    synth: &S,
    matches: MatchResult<&'d S::Desired, S::Live>,
) -> Result<KindReport>
where
    S: ResourceSynthesizer,
{
    let kind = synth.kind();
    let mut report = KindReport::new(kind);

    let MatchResult {
        matched,
        mut desired_only,
        mut live_only,
    } = matches;

    let mut in_place = Vec::with_capacity(matched.len());
    for (desired, live) in matched {
        if synth.requires_replacement(&live, desired) {
            info!(
                kind = %kind,
                resource_id = %synth.desired_id(desired),
                arn = %synth.live_id(&live),
                "Immutable field drift, replacing resource"
            );
            report.replaced += 1;
            desired_only.push(desired);
            live_only.push(live);
        } else {
            in_place.push((desired, live));
        }
    }

    for live in &live_only {
        let arn = synth.live_id(live);
        match synth.delete(live).await {
            Ok(()) => {
                info!(kind = %kind, arn = %arn, "Deleted resource");
                synth.on_deleted(live);
                report.deleted += 1;
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = %kind, arn = %arn, "Resource already gone");
                synth.on_deleted(live);
                report.deleted += 1;
            }
            Err(e) if e.is_in_use() => {
                warn!(kind = %kind, arn = %arn, error = %e, "Resource in use, deferring delete");
                report.deferred.push(synth.deferred(live));
            }
            Err(e) => return Err(e.context(format!("deleting {kind} {arn}"))),
        }
    }

    for desired in desired_only {
        let id = synth.desired_id(desired);
        synth
            .create(desired)
            .await
            .map_err(|e| e.context(format!("creating {kind} {id}")))?;
        info!(kind = %kind, resource_id = %id, "Created resource");
        report.created += 1;
    }

    let mut errors: Vec<SynthError> = Vec::new();
    for (desired, live) in &in_place {
        let id = synth.desired_id(desired);
        match synth.update(live, desired).await {
            Ok(true) => report.updated += 1,
            Ok(false) => report.unchanged += 1,
            Err(e) => {
                error!(kind = %kind, resource_id = %id, error = %e, "Update failed");
                errors.push(e.context(format!("updating {kind} {id}")));
            }
        }
    }

    if let Some(first) = errors.into_iter().next() {
        return Err(first);
    }

    Ok(report)
}

/// Retry deferred deletes once; returns those still blocked
pub async fn retry_deferred(
    ctx: &SynthContext<'_>,
    deferred: Vec<DeferredDelete>,
) -> Result<Vec<DeferredDelete>> {
    let mut still_blocked = Vec::new();

    for item in deferred {
        let outcome = match item.kind {
            ResourceKind::LoadBalancer => ctx.api.delete_load_balancer(&item.arn).await,
            ResourceKind::TargetGroup => ctx.api.delete_target_group(&item.arn).await,
            ResourceKind::Listener => ctx.api.delete_listener(&item.arn).await,
            ResourceKind::ListenerRule => ctx.api.delete_rule(&item.arn).await,
            ResourceKind::TargetGroupBinding => delete_binding_by_key(ctx, &item.arn).await,
        };

        match outcome {
            Ok(()) => {
                info!(kind = %item.kind, arn = %item.arn, "Deleted deferred resource");
                ctx.mark_deleted(&item.name, item.kind);
            }
            Err(e) if e.is_not_found() => ctx.mark_deleted(&item.name, item.kind),
            Err(e) if e.is_in_use() => {
                warn!(kind = %item.kind, arn = %item.arn, "Resource still in use");
                still_blocked.push(item);
            }
            Err(e) => return Err(e.context(format!("deleting {} {}", item.kind, item.arn))),
        }
    }

    Ok(still_blocked)
}

async fn delete_binding_by_key(ctx: &SynthContext<'_>, key: &str) -> Result<()> {
    let bindings = ctx
        .bindings
        .ok_or_else(|| SynthError::config("no cluster API configured for target group bindings"))?;
    let (namespace, name) = key
        .split_once('/')
        .ok_or_else(|| SynthError::invalid_spec(format!("malformed binding key {key}")))?;
    bindings.delete(namespace, name).await
}

/// Compare action lists, treating an unset forward weight as the API default
pub(crate) fn actions_equivalent(live: &[Action], desired: &[Action]) -> bool {
    live.len() == desired.len()
        && live
            .iter()
            .zip(desired)
            .all(|(l, d)| normalize_action(l) == normalize_action(d))
}

fn normalize_action(action: &Action) -> Action {
    match action {
        Action::Forward {
            target_groups,
            stickiness_seconds,
        } => {
            let mut target_groups: Vec<WeightedTargetGroup> = target_groups
                .iter()
                .map(|tg| WeightedTargetGroup {
                    target_group_arn: tg.target_group_arn.clone(),
                    weight: Some(tg.weight.unwrap_or(1)),
                })
                .collect();
            target_groups.sort_by(|a, b| a.target_group_arn.cmp(&b.target_group_arn));
            Action::Forward {
                target_groups,
                stickiness_seconds: *stickiness_seconds,
            }
        }
        Action::Redirect {
            status_code,
            protocol,
            host,
            port,
            path,
            query,
        } => Action::Redirect {
            status_code: status_code.clone(),
            protocol: without_placeholder(protocol, "#{protocol}"),
            host: without_placeholder(host, "#{host}"),
            port: without_placeholder(port, "#{port}"),
            path: without_placeholder(path, "/#{path}"),
            query: without_placeholder(query, "#{query}"),
        },
        other => other.clone(),
    }
}

/// A redirect component equal to the request placeholder is the same as unset
fn without_placeholder(value: &Option<String>, placeholder: &str) -> Option<String> {
    value.clone().filter(|v| v != placeholder)
}
