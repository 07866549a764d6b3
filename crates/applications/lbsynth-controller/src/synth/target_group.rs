//! Target group synthesis
//!
//! Update order for a matched target group: tags, health check, attributes.
//! Only health check fields the desired spec sets are compared.

use super::{DeferredDelete, KindReport, ResourceSynthesizer, SynthContext, synthesize};
use crate::diff::{TagStore, TargetGroupAttributeStore, reconcile_map};
use crate::matcher::match_by_tag;
use crate::model::TargetGroupResource;
use crate::replacement::target_group_requires_replacement;
use crate::tagging::Tagged;
use async_trait::async_trait;
use lbsynth_core::{
    HealthCheck, LiveTargetGroup, ResourceKind, Result, TargetGroupCreate, TargetGroupStatus,
    TargetType,
};
use tracing::info;

pub struct TargetGroupSynthesizer<'a> {
    ctx: &'a SynthContext<'a>,
}

impl<'a> TargetGroupSynthesizer<'a> {
    pub fn new(ctx: &'a SynthContext<'a>) -> Self {
        Self { ctx }
    }

    /// Synthesize every target group of the stack
    pub async fn run(&self) -> Result<KindReport> {
        let ctx = self.ctx;
        let filters = ctx.tracking.stack_tag_filters(&ctx.stack.id);
        let live = ctx.gateway.list_target_groups(&filters).await?;

        let matches = match_by_tag(
            ResourceKind::TargetGroup,
            ctx.stack.target_groups.iter().collect(),
            |r| r.id.as_str(),
            live,
            ctx.tracking.resource_id_tag_key(),
            |l| &l.tags,
            |l| l.resource.arn.as_str(),
            |d, l| !self.requires_replacement(l, d),
        )?;

        synthesize(self, matches).await
    }

    async fn reconcile_attributes(&self, arn: &str, desired: &TargetGroupResource) -> Result<bool> {
        if desired.spec.attributes.is_empty() {
            return Ok(false);
        }
        reconcile_map(
            &TargetGroupAttributeStore::new(self.ctx.api),
            arn,
            &desired.spec.attributes,
            None,
            &[],
        )
        .await
    }
}

/// Whether any health check field the desired side sets differs from live
pub fn health_check_drifted(live: &HealthCheck, desired: &HealthCheck) -> bool {
    fn drifts<T: PartialEq>(desired: &Option<T>, live: &Option<T>) -> bool {
        desired.is_some() && desired != live
    }

    drifts(&desired.enabled, &live.enabled)
        || drifts(&desired.protocol, &live.protocol)
        || drifts(&desired.port, &live.port)
        || drifts(&desired.path, &live.path)
        || drifts(&desired.interval_seconds, &live.interval_seconds)
        || drifts(&desired.timeout_seconds, &live.timeout_seconds)
        || drifts(&desired.healthy_threshold_count, &live.healthy_threshold_count)
        || drifts(&desired.unhealthy_threshold_count, &live.unhealthy_threshold_count)
        || drifts(&desired.matcher, &live.matcher)
}

#[async_trait]
impl ResourceSynthesizer for TargetGroupSynthesizer<'_> {
    type Desired = TargetGroupResource;
    type Live = Tagged<LiveTargetGroup>;

    fn kind(&self) -> ResourceKind {
        ResourceKind::TargetGroup
    }

    fn desired_id<'d>(&self, desired: &'d TargetGroupResource) -> &'d str {
        &desired.id
    }

    fn live_id<'l>(&self, live: &'l Tagged<LiveTargetGroup>) -> &'l str {
        &live.resource.arn
    }

    fn requires_replacement(&self, live: &Tagged<LiveTargetGroup>, desired: &TargetGroupResource) -> bool {
        target_group_requires_replacement(&live.resource, &desired.spec, &self.ctx.features)
    }

    async fn create(&self, desired: &TargetGroupResource) -> Result<()> {
        let ctx = self.ctx;
        let spec = &desired.spec;

        // Lambda target groups live outside any VPC
        let vpc_id = (spec.target_type != TargetType::Lambda).then(|| ctx.vpc_id.to_string());

        let created = ctx
            .api
            .create_target_group(&TargetGroupCreate {
                name: spec.name.clone(),
                target_type: spec.target_type,
                protocol: spec.protocol,
                protocol_version: spec.protocol_version.clone(),
                port: spec.port,
                ip_address_type: spec.ip_address_type,
                vpc_id,
                health_check: spec.health_check.clone(),
                tags: ctx.tracking.resource_tags(&ctx.stack.id, &desired.id, &spec.tags),
            })
            .await?;

        desired.set_status(TargetGroupStatus {
            arn: created.arn.clone(),
        });
        ctx.mark_present(&created.name, ResourceKind::TargetGroup);

        self.reconcile_attributes(&created.arn, desired).await?;
        Ok(())
    }

    async fn update(&self, live: &Tagged<LiveTargetGroup>, desired: &TargetGroupResource) -> Result<bool> {
        let ctx = self.ctx;
        let tg = &live.resource;

        desired.set_status(TargetGroupStatus {
            arn: tg.arn.clone(),
        });
        ctx.mark_present(&tg.name, ResourceKind::TargetGroup);

        let tags = ctx.tracking.resource_tags(&ctx.stack.id, &desired.id, &desired.spec.tags);
        let mut changed = reconcile_map(
            &TagStore::new(ctx.api),
            &tg.arn,
            &tags,
            Some(&live.tags),
            &ctx.tracking.ignored_tag_keys(),
        )
        .await?;

        if health_check_drifted(&tg.health_check, &desired.spec.health_check) {
            info!(arn = %tg.arn, "Modifying health check");
            ctx.api
                .modify_target_group(&tg.arn, &desired.spec.health_check)
                .await?;
            changed = true;
        }

        changed |= self.reconcile_attributes(&tg.arn, desired).await?;
        Ok(changed)
    }

    async fn delete(&self, live: &Tagged<LiveTargetGroup>) -> Result<()> {
        self.ctx.api.delete_target_group(&live.resource.arn).await
    }

    fn deferred(&self, live: &Tagged<LiveTargetGroup>) -> DeferredDelete {
        DeferredDelete {
            kind: ResourceKind::TargetGroup,
            arn: live.resource.arn.clone(),
            name: live.resource.name.clone(),
        }
    }

    fn on_deleted(&self, live: &Tagged<LiveTargetGroup>) {
        self.ctx.mark_deleted(&live.resource.name, ResourceKind::TargetGroup);
    }
}
