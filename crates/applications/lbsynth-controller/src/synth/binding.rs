//! Target group binding synthesis
//!
//! Bindings are cluster objects, matched by the resource-id label. A patch is
//! complete once the binding controller reports `observedGeneration` at or
//! past the new generation; a delete is complete once the object is gone.

use super::{DeferredDelete, KindReport, ResourceSynthesizer, SynthContext, synthesize};
use crate::matcher::match_by_tag;
use crate::model::TargetGroupBindingResource;
use crate::replacement::binding_requires_replacement;
use crate::tracking::RESOURCE_LABEL;
use async_trait::async_trait;
use lbsynth_core::{
    BindingApi, BindingSettings, ResourceKind, Result, SynthError, TargetGroupBinding,
    TargetGroupBindingStatus,
};
use tracing::{debug, info};

pub struct BindingSynthesizer<'a> {
    ctx: &'a SynthContext<'a>,
    bindings: &'a dyn BindingApi,
}

/// `namespace/name` of a binding object
fn object_key(binding: &TargetGroupBinding) -> String {
    format!("{}/{}", binding.namespace, binding.name)
}

impl<'a> BindingSynthesizer<'a> {
    /// Fails when no cluster API was configured
    pub fn new(ctx: &'a SynthContext<'a>) -> Result<Self> {
        let bindings = ctx
            .bindings
            .ok_or_else(|| SynthError::config("no cluster API configured for target group bindings"))?;
        Ok(Self { ctx, bindings })
    }

    /// Synthesize every binding of the stack
    pub async fn run(&self) -> Result<KindReport> {
        let ctx = self.ctx;
        let live: Vec<(String, TargetGroupBinding)> = self
            .bindings
            .list(&ctx.tracking.stack_labels(&ctx.stack.id))
            .await?
            .into_iter()
            .map(|b| (object_key(&b), b))
            .collect();

        let matches = match_by_tag(
            ResourceKind::TargetGroupBinding,
            ctx.stack.target_group_bindings.iter().collect(),
            |r| r.id.as_str(),
            live,
            RESOURCE_LABEL,
            |(_, b)| &b.labels,
            |(key, _)| key.as_str(),
            |d, l| !self.requires_replacement(l, d),
        )?;

        synthesize(self, matches).await
    }

    /// Binding object the model asks for
    pub fn desired_object(&self, desired: &TargetGroupBindingResource) -> Result<TargetGroupBinding> {
        let ctx = self.ctx;
        let spec = &desired.spec;

        Ok(TargetGroupBinding {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            labels: ctx
                .tracking
                .binding_labels(&ctx.stack.id, &desired.id, &spec.labels),
            generation: 0,
            observed_generation: None,
            spec: BindingSettings {
                target_group_arn: ctx.stack.resolve(&spec.target_group_arn)?,
                target_type: spec.target_type,
                service_ref: spec.service_ref.clone(),
                ip_address_type: spec.ip_address_type,
                vpc_id: spec.vpc_id.clone(),
                node_selector: spec.node_selector.clone(),
            },
        })
    }

    fn set_status(&self, desired: &TargetGroupBindingResource) {
        desired.set_status(TargetGroupBindingStatus {
            name: desired.spec.name.clone(),
            namespace: desired.spec.namespace.clone(),
        });
        self.ctx
            .mark_present(&object_key_of(desired), ResourceKind::TargetGroupBinding);
    }

    async fn wait_observed(&self, namespace: &str, name: &str) -> Result<()> {
        let bindings = self.bindings;
        self.ctx
            .poller
            .until("target group binding to be observed", || async move {
                match bindings.get(namespace, name).await? {
                    Some(binding) => Ok(binding.is_observed().then_some(())),
                    None => Err(SynthError::cluster(format!(
                        "binding {namespace}/{name} disappeared while waiting for it to be observed"
                    ))),
                }
            })
            .await
    }

    async fn wait_deleted(&self, namespace: &str, name: &str) -> Result<()> {
        let bindings = self.bindings;
        self.ctx
            .poller
            .until("target group binding to be deleted", || async move {
                Ok(bindings.get(namespace, name).await?.is_none().then_some(()))
            })
            .await
    }
}

fn object_key_of(desired: &TargetGroupBindingResource) -> String {
    format!("{}/{}", desired.spec.namespace, desired.spec.name)
}

#[async_trait]
impl ResourceSynthesizer for BindingSynthesizer<'_> {
    type Desired = TargetGroupBindingResource;
    type Live = (String, TargetGroupBinding);

    fn kind(&self) -> ResourceKind {
        ResourceKind::TargetGroupBinding
    }

    fn desired_id<'d>(&self, desired: &'d TargetGroupBindingResource) -> &'d str {
        &desired.id
    }

    fn live_id<'l>(&self, live: &'l (String, TargetGroupBinding)) -> &'l str {
        &live.0
    }

    fn requires_replacement(&self, live: &(String, TargetGroupBinding), desired: &TargetGroupBindingResource) -> bool {
        binding_requires_replacement(&live.1, &desired.spec)
    }

    async fn create(&self, desired: &TargetGroupBindingResource) -> Result<()> {
        let object = self.desired_object(desired)?;
        self.bindings.create(&object).await?;
        self.set_status(desired);
        Ok(())
    }

    async fn update(&self, live: &(String, TargetGroupBinding), desired: &TargetGroupBindingResource) -> Result<bool> {
        let (key, current) = live;
        let wanted = self.desired_object(desired)?;
        self.set_status(desired);

        if current.spec == wanted.spec && current.labels == wanted.labels {
            debug!(binding = %key, "Binding up to date");
            return Ok(false);
        }

        info!(binding = %key, "Patching binding");
        let patched = self
            .bindings
            .patch(&TargetGroupBinding {
                generation: current.generation,
                observed_generation: current.observed_generation,
                ..wanted
            })
            .await?;

        self.wait_observed(&patched.namespace, &patched.name).await?;
        Ok(true)
    }

    async fn delete(&self, live: &(String, TargetGroupBinding)) -> Result<()> {
        let binding = &live.1;
        self.bindings.delete(&binding.namespace, &binding.name).await?;
        self.wait_deleted(&binding.namespace, &binding.name).await
    }

    fn deferred(&self, live: &(String, TargetGroupBinding)) -> DeferredDelete {
        DeferredDelete {
            kind: ResourceKind::TargetGroupBinding,
            arn: live.0.clone(),
            name: live.0.clone(),
        }
    }

    fn on_deleted(&self, live: &(String, TargetGroupBinding)) {
        self.ctx.mark_deleted(&live.0, ResourceKind::TargetGroupBinding);
    }
}
