//! Load balancer synthesis
//!
//! Update order for a matched load balancer: tags, subnets, security groups,
//! IP address type, attributes, capacity reservation.

use super::{DeferredDelete, ResourceSynthesizer, SynthContext, synthesize, KindReport};
use crate::capacity::reconcile_capacity;
use crate::diff::{LoadBalancerAttributeStore, TagStore, reconcile_map};
use crate::matcher::match_by_tag;
use crate::model::LoadBalancerResource;
use crate::replacement::load_balancer_requires_replacement;
use crate::tagging::Tagged;
use async_trait::async_trait;
use lbsynth_core::{
    LiveLoadBalancer, LoadBalancerCreate, LoadBalancerStatus, LoadBalancerType, ResourceKind,
    Result,
};
use std::collections::BTreeSet;
use tracing::info;

pub struct LoadBalancerSynthesizer<'a> {
    ctx: &'a SynthContext<'a>,
}

impl<'a> LoadBalancerSynthesizer<'a> {
    pub fn new(ctx: &'a SynthContext<'a>) -> Self {
        Self { ctx }
    }

    /// Synthesize every load balancer of the stack
    pub async fn run(&self) -> Result<KindReport> {
        let ctx = self.ctx;
        let filters = ctx.tracking.stack_tag_filters(&ctx.stack.id);
        let live = ctx.gateway.list_load_balancers(&filters).await?;

        let matches = match_by_tag(
            ResourceKind::LoadBalancer,
            ctx.stack.load_balancers.iter().collect(),
            |r| r.id.as_str(),
            live,
            ctx.tracking.resource_id_tag_key(),
            |l| &l.tags,
            |l| l.resource.arn.as_str(),
            |d, l| !self.requires_replacement(l, d),
        )?;

        synthesize(self, matches).await
    }

    async fn reconcile_settings(
        &self,
        live: &LiveLoadBalancer,
        desired: &LoadBalancerResource,
    ) -> Result<bool> {
        let api = self.ctx.api;
        let spec = &desired.spec;
        let arn = &live.arn;
        let mut changed = false;

        if !spec.subnets.is_empty() && !same_set(&live.subnets, &spec.subnets) {
            info!(arn = %arn, subnets = ?spec.subnets, "Setting subnets");
            api.set_subnets(arn, &spec.subnets).await?;
            changed = true;
        }

        if !spec.security_groups.is_empty() && !same_set(&live.security_groups, &spec.security_groups) {
            info!(arn = %arn, security_groups = ?spec.security_groups, "Setting security groups");
            api.set_security_groups(arn, &spec.security_groups).await?;
            changed = true;
        }

        if let Some(ip_address_type) = spec.ip_address_type {
            if live.ip_address_type != Some(ip_address_type) {
                info!(arn = %arn, ip_address_type = %ip_address_type, "Setting IP address type");
                api.set_ip_address_type(arn, ip_address_type).await?;
                changed = true;
            }
        }

        Ok(changed)
    }

    async fn reconcile_extras(&self, arn: &str, desired: &LoadBalancerResource) -> Result<bool> {
        let ctx = self.ctx;
        let spec = &desired.spec;
        let mut changed = false;

        if !spec.attributes.is_empty() {
            changed |= reconcile_map(
                &LoadBalancerAttributeStore::new(ctx.api),
                arn,
                &spec.attributes,
                None,
                &[],
            )
            .await?;
        }

        if ctx.features.capacity_reservation && spec.lb_type != LoadBalancerType::Gateway {
            changed |= reconcile_capacity(
                ctx.api,
                &ctx.poller,
                arn,
                spec.capacity_reservation.as_ref(),
            )
            .await?
            .is_some();
        }

        Ok(changed)
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

#[async_trait]
impl ResourceSynthesizer for LoadBalancerSynthesizer<'_> {
    type Desired = LoadBalancerResource;
    type Live = Tagged<LiveLoadBalancer>;

    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn desired_id<'d>(&self, desired: &'d LoadBalancerResource) -> &'d str {
        &desired.id
    }

    fn live_id<'l>(&self, live: &'l Tagged<LiveLoadBalancer>) -> &'l str {
        &live.resource.arn
    }

    fn requires_replacement(&self, live: &Tagged<LiveLoadBalancer>, desired: &LoadBalancerResource) -> bool {
        load_balancer_requires_replacement(&live.resource, &desired.spec)
    }

    async fn create(&self, desired: &LoadBalancerResource) -> Result<()> {
        let ctx = self.ctx;
        let spec = &desired.spec;
        let tags = ctx.tracking.resource_tags(&ctx.stack.id, &desired.id, &spec.tags);

        let created = ctx
            .api
            .create_load_balancer(&LoadBalancerCreate {
                name: spec.name.clone(),
                lb_type: spec.lb_type,
                scheme: spec.scheme,
                ip_address_type: spec.ip_address_type,
                subnets: spec.subnets.clone(),
                security_groups: spec.security_groups.clone(),
                tags,
            })
            .await?;

        desired.set_status(LoadBalancerStatus {
            arn: created.arn.clone(),
            dns_name: created.dns_name.clone(),
        });
        ctx.mark_present(&created.name, ResourceKind::LoadBalancer);

        self.reconcile_extras(&created.arn, desired).await?;
        Ok(())
    }

    async fn update(&self, live: &Tagged<LiveLoadBalancer>, desired: &LoadBalancerResource) -> Result<bool> {
        let ctx = self.ctx;
        let lb = &live.resource;

        desired.set_status(LoadBalancerStatus {
            arn: lb.arn.clone(),
            dns_name: lb.dns_name.clone(),
        });
        ctx.mark_present(&lb.name, ResourceKind::LoadBalancer);

        let tags = ctx.tracking.resource_tags(&ctx.stack.id, &desired.id, &desired.spec.tags);
        let mut changed = reconcile_map(
            &TagStore::new(ctx.api),
            &lb.arn,
            &tags,
            Some(&live.tags),
            &ctx.tracking.ignored_tag_keys(),
        )
        .await?;

        changed |= self.reconcile_settings(lb, desired).await?;
        changed |= self.reconcile_extras(&lb.arn, desired).await?;

        Ok(changed)
    }

    async fn delete(&self, live: &Tagged<LiveLoadBalancer>) -> Result<()> {
        self.ctx.api.delete_load_balancer(&live.resource.arn).await
    }

    fn deferred(&self, live: &Tagged<LiveLoadBalancer>) -> DeferredDelete {
        DeferredDelete {
            kind: ResourceKind::LoadBalancer,
            arn: live.resource.arn.clone(),
            name: live.resource.name.clone(),
        }
    }

    fn on_deleted(&self, live: &Tagged<LiveLoadBalancer>) {
        self.ctx.mark_deleted(&live.resource.name, ResourceKind::LoadBalancer);
    }
}
