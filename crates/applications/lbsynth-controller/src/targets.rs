//! Target registration and health waits
//!
//! ## Drain flow
//!
//! 1. Deregister the target (the load balancer stops sending new requests)
//! 2. Wait while the target reports `draining`
//! 3. The target is gone once it is no longer reported, or reported `unused`

use crate::poll::Poller;
use lbsynth_core::{LoadBalancingApi, Result, TargetDescription, TargetHealthState};
use std::sync::Arc;
use tracing::{debug, info};

/// Registers targets and waits on their health
pub struct TargetManager {
    api: Arc<dyn LoadBalancingApi>,
    poller: Poller,
}

impl TargetManager {
    pub fn new(api: Arc<dyn LoadBalancingApi>, poller: Poller) -> Self {
        Self { api, poller }
    }

    pub async fn register(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        info!(
            target_group = %target_group_arn,
            targets = ?target_ids(targets),
            "Registering targets"
        );
        self.api.register_targets(target_group_arn, targets).await
    }

    /// Stop new requests to the targets; in-flight requests may still drain
    pub async fn deregister(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        info!(
            target_group = %target_group_arn,
            targets = ?target_ids(targets),
            "Deregistering targets"
        );
        self.api.deregister_targets(target_group_arn, targets).await
    }

    /// Health of one target, `None` when the group does not report it
    pub async fn target_health(
        &self,
        target_group_arn: &str,
        target: &TargetDescription,
    ) -> Result<Option<TargetHealthState>> {
        let health = self
            .api
            .describe_target_health(target_group_arn, std::slice::from_ref(target))
            .await?;

        Ok(health
            .into_iter()
            .find(|h| h.target.id == target.id)
            .and_then(|h| h.state))
    }

    /// Ids of every healthy target in the group
    pub async fn healthy_targets(&self, target_group_arn: &str) -> Result<Vec<String>> {
        Ok(self
            .api
            .describe_target_health(target_group_arn, &[])
            .await?
            .into_iter()
            .filter(|h| h.state == Some(TargetHealthState::Healthy))
            .map(|h| h.target.id)
            .collect())
    }

    /// Poll until the target reports `healthy`
    pub async fn wait_for_healthy(&self, target_group_arn: &str, target: &TargetDescription) -> Result<()> {
        info!(
            target_group = %target_group_arn,
            target = %target.id,
            timeout_secs = self.poller.timeout().as_secs(),
            "Waiting for target to become healthy"
        );

        self.poller
            .until("target to become healthy", || async move {
                let state = self.target_health(target_group_arn, target).await?;
                debug!(target = %target.id, state = ?state, "Target health");
                Ok((state == Some(TargetHealthState::Healthy)).then_some(()))
            })
            .await?;

        info!(target = %target.id, "Target is healthy");
        Ok(())
    }

    /// Poll until the target has left the group after deregistration
    pub async fn wait_for_drained(&self, target_group_arn: &str, target: &TargetDescription) -> Result<()> {
        self.poller
            .until("target to finish draining", || async move {
                let state = self.target_health(target_group_arn, target).await?;
                debug!(target = %target.id, state = ?state, "Target health");
                Ok(matches!(state, None | Some(TargetHealthState::Unused)).then_some(()))
            })
            .await?;

        info!(target = %target.id, "Target fully drained");
        Ok(())
    }
}

fn target_ids(targets: &[TargetDescription]) -> Vec<&str> {
    targets.iter().map(|t| t.id.as_str()).collect()
}
