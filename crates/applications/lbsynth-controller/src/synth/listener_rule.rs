//! Listener rule synthesis
//!
//! Rules are matched by priority under their listener. The default rule of a
//! listener is never listed and never touched.

use super::{
    DeferredDelete, KindReport, ResourceSynthesizer, SynthContext, actions_equivalent, synthesize,
};
use crate::diff::{TagStore, reconcile_map};
use crate::matcher::match_by_key;
use crate::model::ListenerRuleResource;
use crate::tagging::Tagged;
use async_trait::async_trait;
use lbsynth_core::{LiveRule, ResourceKind, Result, RuleSettings, RuleStatus, Tags};
use std::collections::BTreeMap;
use tracing::info;

/// A model rule with every reference resolved
pub struct DesiredRule<'a> {
    pub resource: &'a ListenerRuleResource,
    pub settings: RuleSettings,
}

pub struct ListenerRuleSynthesizer<'a> {
    ctx: &'a SynthContext<'a>,
}

impl<'a> ListenerRuleSynthesizer<'a> {
    pub fn new(ctx: &'a SynthContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn resolve(&self, resource: &'a ListenerRuleResource) -> Result<DesiredRule<'a>> {
        let stack = self.ctx.stack;
        let spec = &resource.spec;

        let settings = RuleSettings {
            listener_arn: stack.resolve(&spec.listener_arn)?,
            priority: spec.priority,
            conditions: spec.conditions.clone(),
            actions: spec
                .actions
                .iter()
                .map(|action| action.resolve(|token| stack.resolve(token)))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(DesiredRule { resource, settings })
    }

    /// Synthesize every rule of the stack, one listener at a time
    pub async fn run(&self) -> Result<KindReport> {
        let ctx = self.ctx;

        let mut desired_by_listener: BTreeMap<String, Vec<DesiredRule<'a>>> = BTreeMap::new();
        for resource in &ctx.stack.listener_rules {
            let desired = self.resolve(resource)?;
            desired_by_listener
                .entry(desired.settings.listener_arn.clone())
                .or_default()
                .push(desired);
        }

        for listener in &ctx.stack.listeners {
            if let Some(status) = listener.status() {
                desired_by_listener.entry(status.arn).or_default();
            }
        }

        let mut report = KindReport::new(ResourceKind::ListenerRule);
        for (listener_arn, desired) in &desired_by_listener {
            let live = self.live_rules(listener_arn).await?;
            let matches = match_by_key(
                ResourceKind::ListenerRule,
                desired.iter().collect(),
                |d| d.settings.priority,
                live,
                |l| l.resource.settings.priority,
            )?;
            report.merge(synthesize(self, matches).await?);
        }

        Ok(report)
    }

    async fn live_rules(&self, listener_arn: &str) -> Result<Vec<Tagged<LiveRule>>> {
        let ctx = self.ctx;
        let rules = ctx.api.describe_rules(listener_arn).await?;

        let mut tags = if ctx.features.listener_rules_tagging {
            let arns: Vec<String> = rules.iter().map(|r| r.arn.clone()).collect();
            ctx.gateway.fetch_tags(&arns).await?
        } else {
            BTreeMap::new()
        };

        Ok(rules
            .into_iter()
            .map(|rule| {
                let rule_tags = tags.remove(&rule.arn).unwrap_or_default();
                Tagged::new(rule, rule_tags)
            })
            .collect())
    }

    fn desired_tags(&self, desired: &DesiredRule<'_>) -> Tags {
        if self.ctx.features.listener_rules_tagging {
            self.ctx
                .tracking
                .resource_tags(&self.ctx.stack.id, &desired.resource.id, &desired.resource.spec.tags)
        } else {
            Tags::new()
        }
    }
}

/// Conditions are compared as given; actions with the default forward weight
pub fn rule_drifted(live: &RuleSettings, desired: &RuleSettings) -> bool {
    live.conditions != desired.conditions || !actions_equivalent(&live.actions, &desired.actions)
}

#[async_trait]
impl<'a> ResourceSynthesizer for ListenerRuleSynthesizer<'a> {
    type Desired = DesiredRule<'a>;
    type Live = Tagged<LiveRule>;

    fn kind(&self) -> ResourceKind {
        ResourceKind::ListenerRule
    }

    fn desired_id<'d>(&self, desired: &'d DesiredRule<'a>) -> &'d str {
        &desired.resource.id
    }

    fn live_id<'l>(&self, live: &'l Tagged<LiveRule>) -> &'l str {
        &live.resource.arn
    }

    async fn create(&self, desired: &DesiredRule<'a>) -> Result<()> {
        let ctx = self.ctx;
        let created = ctx
            .api
            .create_rule(&desired.settings, &self.desired_tags(desired))
            .await?;

        desired.resource.set_status(RuleStatus {
            arn: created.arn.clone(),
        });
        ctx.mark_present(&created.arn, ResourceKind::ListenerRule);
        Ok(())
    }

    async fn update(&self, live: &Tagged<LiveRule>, desired: &DesiredRule<'a>) -> Result<bool> {
        let ctx = self.ctx;
        let arn = &live.resource.arn;

        desired.resource.set_status(RuleStatus { arn: arn.clone() });
        ctx.mark_present(arn, ResourceKind::ListenerRule);

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

        if rule_drifted(&live.resource.settings, &desired.settings) {
            info!(arn = %arn, priority = desired.settings.priority, "Modifying rule");
            ctx.api.modify_rule(arn, &desired.settings).await?;
            changed = true;
        }

        Ok(changed)
    }

    async fn delete(&self, live: &Tagged<LiveRule>) -> Result<()> {
        self.ctx.api.delete_rule(&live.resource.arn).await
    }

    fn deferred(&self, live: &Tagged<LiveRule>) -> DeferredDelete {
        DeferredDelete {
            kind: ResourceKind::ListenerRule,
            arn: live.resource.arn.clone(),
            name: live.resource.arn.clone(),
        }
    }

    fn on_deleted(&self, live: &Tagged<LiveRule>) {
        self.ctx.mark_deleted(&live.resource.arn, ResourceKind::ListenerRule);
    }
}
