//! Capacity reservation reconciliation
//!
//! Desired capacity is normalized before comparison: an explicit zero means
//! "reset to no reservation", the same as not asking for one. Drift is resolved
//! by exactly one call, either a reset or a modify.

use crate::poll::Poller;
use lbsynth_core::{CapacityReservation, LoadBalancingApi, Result};
use tracing::{debug, info};

/// Action needed to converge the reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityChange {
    Reset,
    Modify(i32),
}

/// Desired capacity units, with zero folded into "none"
pub fn normalize(desired: Option<&CapacityReservation>) -> Option<i32> {
    desired
        .map(|reservation| reservation.capacity_units)
        .filter(|units| *units != 0)
}

/// Plan the change that turns `current` into `desired`
pub fn plan(desired: Option<&CapacityReservation>, current: Option<i32>) -> Option<CapacityChange> {
    match (normalize(desired), current) {
        (wanted, current) if wanted == current => None,
        (None, Some(_)) => Some(CapacityChange::Reset),
        (Some(units), _) => Some(CapacityChange::Modify(units)),
        (None, None) => None,
    }
}

/// Reconcile the capacity reservation of a load balancer.
///
/// Waits for an in-flight provisioning change to settle before comparing.
/// Returns the change that was applied, if any.
pub async fn reconcile_capacity(
    api: &dyn LoadBalancingApi,
    poller: &Poller,
    arn: &str,
    desired: Option<&CapacityReservation>,
) -> Result<Option<CapacityChange>> {
    let mut status = api.describe_capacity_reservation(arn).await?;

    if status.provisioning {
        debug!(arn = %arn, "Capacity reservation still provisioning");
        status = poller
            .until("capacity reservation to finish provisioning", || async move {
                let status = api.describe_capacity_reservation(arn).await?;
                Ok((!status.provisioning).then_some(status))
            })
            .await?;
    }

    let Some(change) = plan(desired, status.capacity_units) else {
        debug!(arn = %arn, "Capacity reservation up to date");
        return Ok(None);
    };

    match change {
        CapacityChange::Reset => {
            info!(arn = %arn, "Resetting capacity reservation");
            api.reset_capacity_reservation(arn).await?;
        }
        CapacityChange::Modify(units) => {
            info!(arn = %arn, capacity_units = units, "Modifying capacity reservation");
            api.modify_capacity_reservation(arn, units).await?;
        }
    }

    Ok(Some(change))
}
