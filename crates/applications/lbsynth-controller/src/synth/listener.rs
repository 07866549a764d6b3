//! Listener synthesis
//!
//! Listeners are matched by port under their load balancer. Every load
//! balancer of the stack is inspected, so a listener removed from the model is
//! deleted even when no other listener remains on that load balancer.

use super::{
    DeferredDelete, KindReport, ResourceSynthesizer, SynthContext, actions_equivalent, synthesize,
};
use crate::diff::{TagStore, reconcile_map};
use crate::matcher::match_by_key;
use crate::model::ListenerResource;
use crate::tagging::Tagged;
use async_trait::async_trait;
use lbsynth_core::{
    ListenerSettings, ListenerStatus, LiveListener, Protocol, ResourceKind, Result, Tags,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A model listener with every reference resolved
pub struct DesiredListener<'a> {
    pub resource: &'a ListenerResource,
    pub settings: ListenerSettings,
}

impl DesiredListener<'_> {
    /// Non-default certificates
    fn extra_certificates(&self) -> BTreeSet<&String> {
        self.resource.spec.certificates.iter().skip(1).collect()
    }
}

pub struct ListenerSynthesizer<'a> {
    ctx: &'a SynthContext<'a>,
}

impl<'a> ListenerSynthesizer<'a> {
    pub fn new(ctx: &'a SynthContext<'a>) -> Self {
        Self { ctx }
    }

    /// Resolve a model listener against the statuses written so far
    pub fn resolve(&self, resource: &'a ListenerResource) -> Result<DesiredListener<'a>> {
        let stack = self.ctx.stack;
        let spec = &resource.spec;

        let settings = ListenerSettings {
            load_balancer_arn: stack.resolve(&spec.load_balancer_arn)?,
            port: spec.port,
            protocol: spec.protocol,
            ssl_policy: spec.ssl_policy.clone(),
            default_certificate: spec.certificates.first().cloned(),
            alpn_policy: spec.alpn_policy.clone(),
            default_actions: spec
                .default_actions
                .iter()
                .map(|action| action.resolve(|token| stack.resolve(token)))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(DesiredListener { resource, settings })
    }

    /// Synthesize every listener of the stack, one load balancer at a time
    pub async fn run(&self) -> Result<KindReport> {
        let ctx = self.ctx;

        let mut desired_by_lb: BTreeMap<String, Vec<DesiredListener<'a>>> = BTreeMap::new();
        for resource in &ctx.stack.listeners {
            let desired = self.resolve(resource)?;
            desired_by_lb
                .entry(desired.settings.load_balancer_arn.clone())
                .or_default()
                .push(desired);
        }

        for lb in &ctx.stack.load_balancers {
            if let Some(status) = lb.status() {
                desired_by_lb.entry(status.arn).or_default();
            }
        }

        let mut report = KindReport::new(ResourceKind::Listener);
        for (lb_arn, desired) in &desired_by_lb {
            let live = self.live_listeners(lb_arn).await?;
            let matches = match_by_key(
                ResourceKind::Listener,
                desired.iter().collect(),
                |d| d.settings.port,
                live,
                |l| l.resource.settings.port,
            )?;
            report.merge(synthesize(self, matches).await?);
        }

        Ok(report)
    }

    async fn live_listeners(&self, lb_arn: &str) -> Result<Vec<Tagged<LiveListener>>> {
        let ctx = self.ctx;
        let listeners = ctx.api.describe_listeners(lb_arn).await?;

        let mut tags = if ctx.features.listener_rules_tagging {
            let arns: Vec<String> = listeners.iter().map(|l| l.arn.clone()).collect();
            ctx.gateway.fetch_tags(&arns).await?
        } else {
            BTreeMap::new()
        };

        Ok(listeners
            .into_iter()
            .map(|listener| {
                let listener_tags = tags.remove(&listener.arn).unwrap_or_default();
                Tagged::new(listener, listener_tags)
            })
            .collect())
    }

    fn desired_tags(&self, desired: &DesiredListener<'_>) -> Tags {
        if self.ctx.features.listener_rules_tagging {
            self.ctx
                .tracking
                .resource_tags(&self.ctx.stack.id, &desired.resource.id, &desired.resource.spec.tags)
        } else {
            Tags::new()
        }
    }

    async fn reconcile_certificates(&self, arn: &str, desired: &DesiredListener<'_>) -> Result<bool> {
        if !matches!(desired.settings.protocol, Protocol::Https | Protocol::Tls) {
            return Ok(false);
        }

        let api = self.ctx.api;
        let live = api.describe_listener_certificates(arn).await?;
        let live: BTreeSet<&String> = live.iter().collect();
        let wanted = desired.extra_certificates();

        let to_add: Vec<String> = wanted.difference(&live).map(|c| (*c).clone()).collect();
        let to_remove: Vec<String> = live
            .difference(&wanted)
            .filter(|c| desired.settings.default_certificate.as_ref() != Some(**c))
            .map(|c| (*c).clone())
            .collect();

        if !to_add.is_empty() {
            info!(arn = %arn, certificates = ?to_add, "Adding listener certificates");
            api.add_listener_certificates(arn, &to_add).await?;
        }
        if !to_remove.is_empty() {
            info!(arn = %arn, certificates = ?to_remove, "Removing listener certificates");
            api.remove_listener_certificates(arn, &to_remove).await?;
        }

        Ok(!to_add.is_empty() || !to_remove.is_empty())
    }
}

/// Whether the live listener differs from what the model asks for. Unset SSL
/// policy, certificate and ALPN policy mean "no opinion".
pub fn listener_drifted(live: &ListenerSettings, desired: &ListenerSettings) -> bool {
    live.protocol != desired.protocol
        || (desired.ssl_policy.is_some() && live.ssl_policy != desired.ssl_policy)
        || (desired.default_certificate.is_some()
            && live.default_certificate != desired.default_certificate)
        || (!desired.alpn_policy.is_empty() && live.alpn_policy != desired.alpn_policy)
        || !actions_equivalent(&live.default_actions, &desired.default_actions)
}

#[async_trait]
impl<'a> ResourceSynthesizer for ListenerSynthesizer<'a> {
    type Desired = DesiredListener<'a>;
    type Live = Tagged<LiveListener>;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Listener
    }

    fn desired_id<'d>(&self, desired: &'d DesiredListener<'a>) -> &'d str {
        &desired.resource.id
    }

    fn live_id<'l>(&self, live: &'l Tagged<LiveListener>) -> &'l str {
        &live.resource.arn
    }

    async fn create(&self, desired: &DesiredListener<'a>) -> Result<()> {
        let ctx = self.ctx;
        let created = ctx
            .api
            .create_listener(&desired.settings, &self.desired_tags(desired))
            .await?;

        desired.resource.set_status(ListenerStatus {
            arn: created.arn.clone(),
        });
        ctx.mark_present(&created.arn, ResourceKind::Listener);

        self.reconcile_certificates(&created.arn, desired).await?;
        Ok(())
    }

    async fn update(&self, live: &Tagged<LiveListener>, desired: &DesiredListener<'a>) -> Result<bool> {
        let ctx = self.ctx;
        let arn = &live.resource.arn;

        desired.resource.set_status(ListenerStatus { arn: arn.clone() });
        ctx.mark_present(arn, ResourceKind::Listener);

        let mut changed = false;
        if ctx.features.listener_rules_tagging {
            changed |= reconcile_map(
                &TagStore::new(ctx.api),
                arn,
                &self.desired_tags(desired),
                Some(&live.tags),
                &ctx.tracking.ignored_tag_keys(),
            )
            .await?;
        }

        if listener_drifted(&live.resource.settings, &desired.settings) {
            info!(arn = %arn, port = desired.settings.port, "Modifying listener");
            ctx.api.modify_listener(arn, &desired.settings).await?;
            changed = true;
        } else {
            debug!(arn = %arn, "Listener settings up to date");
        }

        changed |= self.reconcile_certificates(arn, desired).await?;
        Ok(changed)
    }

    async fn delete(&self, live: &Tagged<LiveListener>) -> Result<()> {
        self.ctx.api.delete_listener(&live.resource.arn).await
    }

    fn deferred(&self, live: &Tagged<LiveListener>) -> DeferredDelete {
        DeferredDelete {
            kind: ResourceKind::Listener,
            arn: live.resource.arn.clone(),
            name: live.resource.arn.clone(),
        }
    }

    fn on_deleted(&self, live: &Tagged<LiveListener>) {
        self.ctx.mark_deleted(&live.resource.arn, ResourceKind::Listener);
    }
}
