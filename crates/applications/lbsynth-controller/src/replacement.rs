//! Update-in-place vs. replace decisions
//!
//! Each kind has a set of fields the API cannot modify. A matched pair that
//! differs in any of them is deleted and recreated instead of updated. Names
//! are never part of the set.

use crate::config::FeatureFlags;
use lbsynth_core::{
    HealthCheck, LiveLoadBalancer, LiveTargetGroup, LoadBalancerSpec, TargetGroupBinding,
    TargetGroupBindingSpec, TargetGroupSpec,
};

/// Load balancer type and scheme are immutable
pub fn load_balancer_requires_replacement(live: &LiveLoadBalancer, desired: &LoadBalancerSpec) -> bool {
    live.lb_type != desired.lb_type || live.scheme != desired.scheme
}

/// Target type and protocol are immutable; so is the protocol version when
/// the desired side sets one.
///
/// Without advanced health-check support, TCP/TLS/UDP target groups also
/// cannot change their health check protocol, matcher, interval or timeout.
pub fn target_group_requires_replacement(
    live: &LiveTargetGroup,
    desired: &TargetGroupSpec,
    features: &FeatureFlags,
) -> bool {
    if live.target_type != desired.target_type {
        return true;
    }
    if desired.protocol.is_some() && live.protocol != desired.protocol {
        return true;
    }
    if desired.protocol_version.is_some() && live.protocol_version != desired.protocol_version {
        return true;
    }

    let connection_oriented = live.protocol.is_some_and(|p| p.is_connection_oriented());
    if !features.nlb_health_check_advanced_config && connection_oriented {
        return restricted_health_check_drift(&live.health_check, &desired.health_check);
    }

    false
}

fn restricted_health_check_drift(live: &HealthCheck, desired: &HealthCheck) -> bool {
    fn drifts<T: PartialEq>(desired: &Option<T>, live: &Option<T>) -> bool {
        desired.is_some() && desired != live
    }

    drifts(&desired.protocol, &live.protocol)
        || drifts(&desired.matcher, &live.matcher)
        || drifts(&desired.interval_seconds, &live.interval_seconds)
        || drifts(&desired.timeout_seconds, &live.timeout_seconds)
}

/// A binding moves only by delete + create. Target type is immutable once
/// both sides set it.
pub fn binding_requires_replacement(live: &TargetGroupBinding, desired: &TargetGroupBindingSpec) -> bool {
    if live.name != desired.name || live.namespace != desired.namespace {
        return true;
    }
    matches!(
        (live.spec.target_type, desired.target_type),
        (Some(current), Some(wanted)) if current != wanted
    )
}
