//! In-memory stand-ins for the load-balancing and cluster APIs

use crate::config::{ControllerConfig, FeatureFlags};
use crate::metrics::{ResourceKey, ResourceMetrics};
use crate::model::{Stack, StackId};
use crate::poll::Poller;
use crate::synth::{
    BindingSynthesizer, KindReport, ListenerRuleSynthesizer, ListenerSynthesizer,
    LoadBalancerSynthesizer, SynthContext, TargetGroupSynthesizer,
};
use crate::tagging::TaggingGateway;
use crate::tracking::TrackingProvider;
use async_trait::async_trait;
use lbsynth_core::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// Cloud
// ============================================================================

#[derive(Default)]
struct CloudState {
    next_id: u64,
    calls: Vec<String>,
    tag_arns_requested: usize,
    failures: BTreeMap<String, String>,
    latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,

    load_balancers: Vec<LiveLoadBalancer>,
    lb_attributes: BTreeMap<String, Attributes>,
    capacity: BTreeMap<String, CapacityReservationStatus>,
    settle_after: BTreeMap<String, u32>,

    target_groups: Vec<LiveTargetGroup>,
    tg_attributes: BTreeMap<String, Attributes>,
    targets: BTreeMap<String, BTreeMap<String, TargetHealthState>>,

    listeners: Vec<LiveListener>,
    certificates: BTreeMap<String, BTreeSet<String>>,
    rules: Vec<LiveRule>,

    tags: BTreeMap<String, Tags>,
}

impl CloudState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn load_balancer_mut(&mut self, op: &str, arn: &str) -> Result<&mut LiveLoadBalancer> {
        self.load_balancers
            .iter_mut()
            .find(|lb| lb.arn == arn)
            .ok_or_else(|| not_found(op, "LoadBalancerNotFound", arn))
    }

    fn target_group_mut(&mut self, op: &str, arn: &str) -> Result<&mut LiveTargetGroup> {
        self.target_groups
            .iter_mut()
            .find(|tg| tg.arn == arn)
            .ok_or_else(|| not_found(op, "TargetGroupNotFound", arn))
    }

    fn listener_mut(&mut self, op: &str, arn: &str) -> Result<&mut LiveListener> {
        self.listeners
            .iter_mut()
            .find(|l| l.arn == arn)
            .ok_or_else(|| not_found(op, "ListenerNotFound", arn))
    }

    fn remove_listener(&mut self, arn: &str) {
        self.listeners.retain(|l| l.arn != arn);
        self.certificates.remove(arn);
        self.tags.remove(arn);
        let rules: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.settings.listener_arn == arn)
            .map(|r| r.arn.clone())
            .collect();
        for rule in rules {
            self.rules.retain(|r| r.arn != rule);
            self.tags.remove(&rule);
        }
    }

    fn target_group_in_use(&self, arn: &str) -> bool {
        self.listeners
            .iter()
            .any(|l| forwards_to(&l.settings.default_actions, arn))
            || self.rules.iter().any(|r| forwards_to(&r.settings.actions, arn))
    }

    fn store_tags(&mut self, arn: &str, tags: &Tags) {
        if !tags.is_empty() {
            self.tags.entry(arn.to_string()).or_default().extend(tags.clone());
        }
    }
}

fn not_found(op: &str, code: &str, arn: &str) -> SynthError {
    CloudError::new(op, code, format!("{arn} not found")).into()
}

fn forwards_to(actions: &[Action], arn: &str) -> bool {
    actions.iter().any(|action| match action {
        Action::Forward { target_groups, .. } => {
            target_groups.iter().any(|tg| tg.target_group_arn == arn)
        }
        _ => false,
    })
}

fn merge_option<T: Clone>(live: &mut Option<T>, update: &Option<T>) {
    if update.is_some() {
        live.clone_from(update);
    }
}

/// Load-balancing API backed by in-memory state, logging every call
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    /// Log the call, apply latency and any injected failure
    async fn enter(&self, op: &str) -> Result<MutexGuard<'_, CloudState>> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            {
                let mut state = self.state();
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
            }
            tokio::time::sleep(latency).await;
            self.state().in_flight -= 1;
        }

        let mut state = self.state();
        state.calls.push(op.to_string());
        if let Some(code) = state.failures.remove(op) {
            return Err(CloudError::new(op, code, "injected failure").into());
        }
        Ok(state)
    }

    /// Fail the next call of `op` with the given error code
    pub fn fail_next(&self, op: &str, code: &str) {
        self.state().failures.insert(op.to_string(), code.to_string());
    }

    /// Delay every call
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Most calls observed sleeping at once; only tracked with latency set
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }

    /// Every call that is not a `Describe*`, in order
    pub fn mutating_calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.starts_with("Describe"))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Total number of ARNs passed to `DescribeTags`
    pub fn tagged_arns_requested(&self) -> usize {
        self.state().tag_arns_requested
    }

    pub fn put_tags(&self, arn: &str, tags: Tags) {
        self.state().tags.insert(arn.to_string(), tags);
    }

    pub fn tags_of(&self, arn: &str) -> Tags {
        self.state().tags.get(arn).cloned().unwrap_or_default()
    }

    pub fn remove_tag(&self, arn: &str, key: &str) {
        if let Some(tags) = self.state().tags.get_mut(arn) {
            tags.remove(key);
        }
    }

    pub fn put_load_balancer(&self, lb: LiveLoadBalancer, tags: Tags) {
        let mut state = self.state();
        state.tags.insert(lb.arn.clone(), tags);
        state.load_balancers.push(lb);
    }

    pub fn put_target_group(&self, tg: LiveTargetGroup, tags: Tags) {
        let mut state = self.state();
        state.tags.insert(tg.arn.clone(), tags);
        state.target_groups.push(tg);
    }

    pub fn target_group(&self, arn: &str) -> Option<LiveTargetGroup> {
        self.state().target_groups.iter().find(|tg| tg.arn == arn).cloned()
    }

    pub fn put_target_group_attributes(&self, arn: &str, attributes: Attributes) {
        self.state().tg_attributes.insert(arn.to_string(), attributes);
    }

    pub fn target_group_attributes(&self, arn: &str) -> Attributes {
        self.state().tg_attributes.get(arn).cloned().unwrap_or_default()
    }

    pub fn put_capacity(&self, arn: &str, capacity_units: Option<i32>) {
        self.put_capacity_status(
            arn,
            CapacityReservationStatus {
                capacity_units,
                provisioning: false,
            },
        );
    }

    pub fn put_capacity_status(&self, arn: &str, status: CapacityReservationStatus) {
        self.state().capacity.insert(arn.to_string(), status);
    }

    /// Stop provisioning once `describes` more describe calls have been answered
    pub fn settle_capacity_after(&self, arn: &str, describes: u32) {
        self.state().settle_after.insert(arn.to_string(), describes);
    }

    /// Listeners of a load balancer in creation order
    pub fn listeners_of(&self, lb_arn: &str) -> Vec<LiveListener> {
        self.state()
            .listeners
            .iter()
            .filter(|l| l.settings.load_balancer_arn == lb_arn)
            .cloned()
            .collect()
    }

    /// Non-default certificates, sorted
    pub fn listener_certificates(&self, arn: &str) -> Vec<String> {
        self.state()
            .certificates
            .get(arn)
            .map(|certs| certs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn target_group_names(&self) -> Vec<String> {
        self.state().target_groups.iter().map(|tg| tg.name.clone()).collect()
    }

    /// Pin a target to a health state
    pub fn set_target_health(&self, tg_arn: &str, id: &str, state: TargetHealthState) {
        self.state()
            .targets
            .entry(tg_arn.to_string())
            .or_default()
            .insert(id.to_string(), state);
    }

    pub fn registered_targets(&self, tg_arn: &str) -> Vec<String> {
        self.state()
            .targets
            .get(tg_arn)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LoadBalancingApi for FakeCloud {
    async fn describe_load_balancers(&self) -> Result<Vec<LiveLoadBalancer>> {
        Ok(self.enter("DescribeLoadBalancers").await?.load_balancers.clone())
    }

    async fn create_load_balancer(&self, request: &LoadBalancerCreate) -> Result<LiveLoadBalancer> {
        let mut state = self.enter("CreateLoadBalancer").await?;
        let id = state.next_id();
        let lb = LiveLoadBalancer {
            arn: format!("arn:lb/{}/{id}", request.name),
            name: request.name.clone(),
            lb_type: request.lb_type,
            scheme: request.scheme,
            vpc_id: Some("vpc-1".to_string()),
            state: Some(LoadBalancerState::Active),
            dns_name: format!("{}-{id}.elb.example.com", request.name),
            ip_address_type: request.ip_address_type,
            subnets: request.subnets.clone(),
            security_groups: request.security_groups.clone(),
        };
        state.store_tags(&lb.arn, &request.tags);
        state.load_balancers.push(lb.clone());
        Ok(lb)
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        let mut state = self.enter("DeleteLoadBalancer").await?;
        state.load_balancer_mut("DeleteLoadBalancer", arn)?;
        state.load_balancers.retain(|lb| lb.arn != arn);
        state.tags.remove(arn);
        state.lb_attributes.remove(arn);
        state.capacity.remove(arn);

        let listeners: Vec<String> = state
            .listeners
            .iter()
            .filter(|l| l.settings.load_balancer_arn == arn)
            .map(|l| l.arn.clone())
            .collect();
        for listener in listeners {
            state.remove_listener(&listener);
        }
        Ok(())
    }

    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<()> {
        let mut state = self.enter("SetSubnets").await?;
        state.load_balancer_mut("SetSubnets", arn)?.subnets = subnets.to_vec();
        Ok(())
    }

    async fn set_security_groups(&self, arn: &str, security_groups: &[String]) -> Result<()> {
        let mut state = self.enter("SetSecurityGroups").await?;
        state.load_balancer_mut("SetSecurityGroups", arn)?.security_groups = security_groups.to_vec();
        Ok(())
    }

    async fn set_ip_address_type(&self, arn: &str, ip_address_type: IpAddressType) -> Result<()> {
        let mut state = self.enter("SetIpAddressType").await?;
        state.load_balancer_mut("SetIpAddressType", arn)?.ip_address_type = Some(ip_address_type);
        Ok(())
    }

    async fn describe_load_balancer_attributes(&self, arn: &str) -> Result<Attributes> {
        let state = self.enter("DescribeLoadBalancerAttributes").await?;
        Ok(state.lb_attributes.get(arn).cloned().unwrap_or_default())
    }

    async fn modify_load_balancer_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()> {
        let mut state = self.enter("ModifyLoadBalancerAttributes").await?;
        state
            .lb_attributes
            .entry(arn.to_string())
            .or_default()
            .extend(attributes.clone());
        Ok(())
    }

    async fn describe_capacity_reservation(&self, arn: &str) -> Result<CapacityReservationStatus> {
        let mut state = self.enter("DescribeCapacityReservation").await?;
        let status = state.capacity.get(arn).copied().unwrap_or_default();

        if status.provisioning {
            if let Some(remaining) = state.settle_after.get_mut(arn) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    state.settle_after.remove(arn);
                    if let Some(current) = state.capacity.get_mut(arn) {
                        current.provisioning = false;
                    }
                }
            }
        }
        Ok(status)
    }

    async fn modify_capacity_reservation(&self, arn: &str, capacity_units: i32) -> Result<()> {
        let mut state = self.enter("ModifyCapacityReservation").await?;
        state.capacity.insert(
            arn.to_string(),
            CapacityReservationStatus {
                capacity_units: Some(capacity_units),
                provisioning: false,
            },
        );
        Ok(())
    }

    async fn reset_capacity_reservation(&self, arn: &str) -> Result<()> {
        let mut state = self.enter("ResetCapacityReservation").await?;
        state
            .capacity
            .insert(arn.to_string(), CapacityReservationStatus::default());
        Ok(())
    }

    async fn describe_target_groups(&self) -> Result<Vec<LiveTargetGroup>> {
        Ok(self.enter("DescribeTargetGroups").await?.target_groups.clone())
    }

    async fn create_target_group(&self, request: &TargetGroupCreate) -> Result<LiveTargetGroup> {
        let mut state = self.enter("CreateTargetGroup").await?;
        let id = state.next_id();
        let tg = LiveTargetGroup {
            arn: format!("arn:tg/{}/{id}", request.name),
            name: request.name.clone(),
            target_type: request.target_type,
            protocol: request.protocol,
            protocol_version: request.protocol_version.clone(),
            port: request.port,
            vpc_id: request.vpc_id.clone(),
            ip_address_type: request.ip_address_type,
            health_check: request.health_check.clone(),
            load_balancer_arns: Vec::new(),
        };
        state.store_tags(&tg.arn, &request.tags);
        state.target_groups.push(tg.clone());
        Ok(tg)
    }

    async fn modify_target_group(&self, arn: &str, health_check: &HealthCheck) -> Result<()> {
        let mut state = self.enter("ModifyTargetGroup").await?;
        let live = &mut state.target_group_mut("ModifyTargetGroup", arn)?.health_check;
        merge_option(&mut live.enabled, &health_check.enabled);
        merge_option(&mut live.protocol, &health_check.protocol);
        merge_option(&mut live.port, &health_check.port);
        merge_option(&mut live.path, &health_check.path);
        merge_option(&mut live.interval_seconds, &health_check.interval_seconds);
        merge_option(&mut live.timeout_seconds, &health_check.timeout_seconds);
        merge_option(&mut live.healthy_threshold_count, &health_check.healthy_threshold_count);
        merge_option(&mut live.unhealthy_threshold_count, &health_check.unhealthy_threshold_count);
        merge_option(&mut live.matcher, &health_check.matcher);
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        let mut state = self.enter("DeleteTargetGroup").await?;
        state.target_group_mut("DeleteTargetGroup", arn)?;
        if state.target_group_in_use(arn) {
            return Err(CloudError::new(
                "DeleteTargetGroup",
                "ResourceInUse",
                format!("target group {arn} is currently in use by a listener or a rule"),
            )
            .into());
        }
        state.target_groups.retain(|tg| tg.arn != arn);
        state.tags.remove(arn);
        state.tg_attributes.remove(arn);
        state.targets.remove(arn);
        Ok(())
    }

    async fn describe_target_group_attributes(&self, arn: &str) -> Result<Attributes> {
        let state = self.enter("DescribeTargetGroupAttributes").await?;
        Ok(state.tg_attributes.get(arn).cloned().unwrap_or_default())
    }

    async fn modify_target_group_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()> {
        let mut state = self.enter("ModifyTargetGroupAttributes").await?;
        state
            .tg_attributes
            .entry(arn.to_string())
            .or_default()
            .extend(attributes.clone());
        Ok(())
    }

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<LiveListener>> {
        let mut state = self.enter("DescribeListeners").await?;
        state.load_balancer_mut("DescribeListeners", load_balancer_arn)?;
        Ok(state
            .listeners
            .iter()
            .filter(|l| l.settings.load_balancer_arn == load_balancer_arn)
            .cloned()
            .collect())
    }

    async fn create_listener(&self, settings: &ListenerSettings, tags: &Tags) -> Result<LiveListener> {
        let mut state = self.enter("CreateListener").await?;
        state.load_balancer_mut("CreateListener", &settings.load_balancer_arn)?;
        if state.listeners.iter().any(|l| {
            l.settings.load_balancer_arn == settings.load_balancer_arn && l.settings.port == settings.port
        }) {
            return Err(CloudError::new(
                "CreateListener",
                "DuplicateListener",
                format!("a listener already exists on port {}", settings.port),
            )
            .into());
        }

        let id = state.next_id();
        let listener = LiveListener {
            arn: format!("arn:listener/{id}"),
            settings: settings.clone(),
        };
        state.store_tags(&listener.arn, tags);
        state.listeners.push(listener.clone());
        Ok(listener)
    }

    async fn modify_listener(&self, arn: &str, settings: &ListenerSettings) -> Result<()> {
        let mut state = self.enter("ModifyListener").await?;
        let listener = state.listener_mut("ModifyListener", arn)?;
        listener.settings = ListenerSettings {
            load_balancer_arn: listener.settings.load_balancer_arn.clone(),
            ..settings.clone()
        };
        Ok(())
    }

    async fn delete_listener(&self, arn: &str) -> Result<()> {
        let mut state = self.enter("DeleteListener").await?;
        state.listener_mut("DeleteListener", arn)?;
        state.remove_listener(arn);
        Ok(())
    }

    async fn describe_listener_certificates(&self, arn: &str) -> Result<Vec<String>> {
        let mut state = self.enter("DescribeListenerCertificates").await?;
        state.listener_mut("DescribeListenerCertificates", arn)?;
        Ok(state
            .certificates
            .get(arn)
            .map(|certs| certs.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()> {
        let mut state = self.enter("AddListenerCertificates").await?;
        state.listener_mut("AddListenerCertificates", arn)?;
        state
            .certificates
            .entry(arn.to_string())
            .or_default()
            .extend(certificates.iter().cloned());
        Ok(())
    }

    async fn remove_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()> {
        let mut state = self.enter("RemoveListenerCertificates").await?;
        state.listener_mut("RemoveListenerCertificates", arn)?;
        if let Some(current) = state.certificates.get_mut(arn) {
            for cert in certificates {
                current.remove(cert);
            }
        }
        Ok(())
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<LiveRule>> {
        let mut state = self.enter("DescribeRules").await?;
        state.listener_mut("DescribeRules", listener_arn)?;
        Ok(state
            .rules
            .iter()
            .filter(|r| r.settings.listener_arn == listener_arn)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, settings: &RuleSettings, tags: &Tags) -> Result<LiveRule> {
        let mut state = self.enter("CreateRule").await?;
        state.listener_mut("CreateRule", &settings.listener_arn)?;
        if state.rules.iter().any(|r| {
            r.settings.listener_arn == settings.listener_arn && r.settings.priority == settings.priority
        }) {
            return Err(CloudError::new(
                "CreateRule",
                "PriorityInUse",
                format!("priority {} is in use", settings.priority),
            )
            .into());
        }

        let id = state.next_id();
        let rule = LiveRule {
            arn: format!("arn:rule/{id}"),
            settings: settings.clone(),
        };
        state.store_tags(&rule.arn, tags);
        state.rules.push(rule.clone());
        Ok(rule)
    }

    async fn modify_rule(&self, arn: &str, settings: &RuleSettings) -> Result<()> {
        let mut state = self.enter("ModifyRule").await?;
        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.arn == arn)
            .ok_or_else(|| not_found("ModifyRule", "RuleNotFound", arn))?;
        rule.settings.conditions = settings.conditions.clone();
        rule.settings.actions = settings.actions.clone();
        Ok(())
    }

    async fn delete_rule(&self, arn: &str) -> Result<()> {
        let mut state = self.enter("DeleteRule").await?;
        if !state.rules.iter().any(|r| r.arn == arn) {
            return Err(not_found("DeleteRule", "RuleNotFound", arn));
        }
        state.rules.retain(|r| r.arn != arn);
        state.tags.remove(arn);
        Ok(())
    }

    async fn describe_tags(&self, arns: &[String]) -> Result<BTreeMap<String, Tags>> {
        let mut state = self.enter("DescribeTags").await?;
        state.tag_arns_requested += arns.len();
        Ok(arns
            .iter()
            .map(|arn| (arn.clone(), state.tags.get(arn).cloned().unwrap_or_default()))
            .collect())
    }

    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<()> {
        let mut state = self.enter("AddTags").await?;
        state.store_tags(arn, tags);
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<()> {
        let mut state = self.enter("RemoveTags").await?;
        if let Some(tags) = state.tags.get_mut(arn) {
            for key in keys {
                tags.remove(key);
            }
        }
        Ok(())
    }

    async fn register_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        let mut state = self.enter("RegisterTargets").await?;
        state.target_group_mut("RegisterTargets", target_group_arn)?;
        let registered = state.targets.entry(target_group_arn.to_string()).or_default();
        for target in targets {
            registered
                .entry(target.id.clone())
                .or_insert(TargetHealthState::Initial);
        }
        Ok(())
    }

    async fn deregister_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        let mut state = self.enter("DeregisterTargets").await?;
        state.target_group_mut("DeregisterTargets", target_group_arn)?;
        if let Some(registered) = state.targets.get_mut(target_group_arn) {
            for target in targets {
                if let Some(health) = registered.get_mut(&target.id) {
                    *health = TargetHealthState::Draining;
                }
            }
        }
        Ok(())
    }

    /// Answers with the current state, then moves `initial` targets to
    /// `healthy` and `draining` targets out of the group
    async fn describe_target_health(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<Vec<TargetHealth>> {
        let mut state = self.enter("DescribeTargetHealth").await?;
        state.target_group_mut("DescribeTargetHealth", target_group_arn)?;
        let registered = state.targets.entry(target_group_arn.to_string()).or_default();

        let wanted: Vec<TargetDescription> = if targets.is_empty() {
            registered.keys().map(TargetDescription::new).collect()
        } else {
            targets.to_vec()
        };

        let health = wanted
            .into_iter()
            .map(|target| {
                let current = registered.get(&target.id).copied();
                match current {
                    Some(TargetHealthState::Initial) => {
                        registered.insert(target.id.clone(), TargetHealthState::Healthy);
                    }
                    Some(TargetHealthState::Draining) => {
                        registered.remove(&target.id);
                    }
                    _ => {}
                }
                TargetHealth {
                    target,
                    state: Some(current.unwrap_or(TargetHealthState::Unused)),
                }
            })
            .collect();
        Ok(health)
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Default)]
struct BindingState {
    objects: BTreeMap<(String, String), TargetGroupBinding>,
    /// Reads left before the binding controller catches up, per object
    pending: BTreeMap<(String, String), u32>,
    lag: u32,
    patches: usize,
}

/// Cluster API with a simulated binding controller
#[derive(Default)]
pub struct FakeBindings {
    state: Mutex<BindingState>,
}

impl FakeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap()
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<TargetGroupBinding> {
        self.state()
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn patch_count(&self) -> usize {
        self.state().patches
    }

    /// Number of reads before a patched object reports its new generation
    pub fn set_observation_lag(&self, reads: u32) {
        self.state().lag = reads;
    }

    pub fn put(&self, binding: TargetGroupBinding) {
        self.state()
            .objects
            .insert((binding.namespace.clone(), binding.name.clone()), binding);
    }
}

#[async_trait]
impl BindingApi for FakeBindings {
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<TargetGroupBinding>> {
        Ok(self
            .state()
            .objects
            .values()
            .filter(|b| labels.iter().all(|(k, v)| b.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetGroupBinding>> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());

        if let Some(remaining) = state.pending.get_mut(&key) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.pending.remove(&key);
                if let Some(object) = state.objects.get_mut(&key) {
                    object.observed_generation = Some(object.generation);
                }
            }
        }
        Ok(state.objects.get(&key).cloned())
    }

    async fn create(&self, binding: &TargetGroupBinding) -> Result<TargetGroupBinding> {
        let mut state = self.state();
        let key = (binding.namespace.clone(), binding.name.clone());
        if state.objects.contains_key(&key) {
            return Err(SynthError::cluster(format!("binding {}/{} already exists", key.0, key.1)));
        }

        let created = TargetGroupBinding {
            generation: 1,
            observed_generation: Some(1),
            ..binding.clone()
        };
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn patch(&self, binding: &TargetGroupBinding) -> Result<TargetGroupBinding> {
        let mut state = self.state();
        let key = (binding.namespace.clone(), binding.name.clone());
        let lag = state.lag;
        state.patches += 1;

        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| SynthError::cluster(format!("binding {}/{} not found", key.0, key.1)))?;
        object.labels = binding.labels.clone();
        object.spec = binding.spec.clone();
        object.generation += 1;
        if lag == 0 {
            object.observed_generation = Some(object.generation);
        }
        let patched = object.clone();

        if lag > 0 {
            state.pending.insert(key, lag);
        }
        Ok(patched)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        state.objects.remove(&key);
        state.pending.remove(&key);
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn live_load_balancer(name: &str, vpc_id: &str) -> LiveLoadBalancer {
    LiveLoadBalancer {
        arn: format!("arn:lb/{name}"),
        name: name.to_string(),
        lb_type: LoadBalancerType::Application,
        scheme: LoadBalancerScheme::Internal,
        vpc_id: Some(vpc_id.to_string()),
        state: Some(LoadBalancerState::Active),
        dns_name: format!("{name}.elb.example.com"),
        ip_address_type: None,
        subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
        security_groups: Vec::new(),
    }
}

pub fn live_target_group(name: &str, vpc_id: &str) -> LiveTargetGroup {
    LiveTargetGroup {
        arn: format!("arn:tg/{name}"),
        name: name.to_string(),
        target_type: TargetType::Ip,
        protocol: Some(Protocol::Http),
        protocol_version: None,
        port: Some(80),
        vpc_id: Some(vpc_id.to_string()),
        ip_address_type: None,
        health_check: HealthCheck::default(),
        load_balancer_arns: Vec::new(),
    }
}

pub fn load_balancer_spec(name: &str) -> LoadBalancerSpec {
    LoadBalancerSpec {
        name: name.to_string(),
        lb_type: LoadBalancerType::Application,
        scheme: LoadBalancerScheme::Internal,
        ip_address_type: None,
        subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
        security_groups: Vec::new(),
        attributes: Attributes::new(),
        capacity_reservation: None,
        tags: Tags::new(),
    }
}

pub fn target_group_spec(name: &str) -> TargetGroupSpec {
    TargetGroupSpec {
        name: name.to_string(),
        target_type: TargetType::Ip,
        protocol: Some(Protocol::Http),
        protocol_version: None,
        port: Some(80),
        ip_address_type: None,
        health_check: HealthCheck::default(),
        attributes: Attributes::new(),
        tags: Tags::new(),
    }
}

pub fn fixed_response(status_code: &str) -> Action<StringToken> {
    Action::FixedResponse {
        status_code: status_code.to_string(),
        content_type: Some("text/plain".to_string()),
        message_body: None,
    }
}

pub fn forward_to(target_group_id: &str) -> Action<StringToken> {
    Action::Forward {
        target_groups: vec![WeightedTargetGroup {
            target_group_arn: StringToken::reference(ResourceKind::TargetGroup, target_group_id),
            weight: None,
        }],
        stickiness_seconds: None,
    }
}

pub fn listener_spec(load_balancer: StringToken, port: i32) -> ListenerSpec {
    ListenerSpec {
        load_balancer_arn: load_balancer,
        port,
        protocol: Protocol::Http,
        ssl_policy: None,
        certificates: Vec::new(),
        alpn_policy: Vec::new(),
        default_actions: vec![fixed_response("404")],
        tags: Tags::new(),
    }
}

pub fn rule_spec(listener: StringToken, priority: i32, path: &str, action: Action<StringToken>) -> RuleSpec {
    RuleSpec {
        listener_arn: listener,
        priority,
        conditions: vec![RuleCondition::PathPattern {
            values: vec![path.to_string()],
        }],
        actions: vec![action],
        tags: Tags::new(),
    }
}

pub fn binding_spec(name: &str, target_group: StringToken) -> TargetGroupBindingSpec {
    TargetGroupBindingSpec {
        name: name.to_string(),
        namespace: "default".to_string(),
        target_group_arn: target_group,
        target_type: None,
        service_ref: ServiceReference {
            name: name.to_string(),
            port: "80".to_string(),
        },
        ip_address_type: None,
        vpc_id: None,
        node_selector: BTreeMap::new(),
        labels: BTreeMap::new(),
    }
}

/// Millisecond-scale poller
pub fn fast_poller() -> Poller {
    Poller::new(
        Duration::from_millis(5),
        Duration::from_millis(100),
        Duration::from_secs(15),
    )
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig::new("prod", "vpc-1")
}

// ============================================================================
// Harness
// ============================================================================

/// Fakes plus the shared state a pass needs, for driving single kinds
pub struct Harness {
    pub cloud: Arc<FakeCloud>,
    pub bindings: Arc<FakeBindings>,
    pub metrics: ResourceMetrics,
    tracking: TrackingProvider,
    gateway: TaggingGateway,
    features: FeatureFlags,
    bindings_enabled: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FeatureFlags::default(), true)
    }

    pub fn with_features(features: FeatureFlags) -> Self {
        Self::build(features, true)
    }

    pub fn without_bindings() -> Self {
        Self::build(FeatureFlags::default(), false)
    }

    fn build(features: FeatureFlags, bindings_enabled: bool) -> Self {
        let config = test_config().with_features(features);
        let cloud = Arc::new(FakeCloud::new());
        Self {
            gateway: TaggingGateway::new(cloud.clone(), &config.vpc_id, config.tag_chunk_size),
            tracking: TrackingProvider::new(&config),
            cloud,
            bindings: Arc::new(FakeBindings::new()),
            metrics: ResourceMetrics::new(),
            features,
            bindings_enabled,
        }
    }

    fn context<'a>(&'a self, stack: &'a Stack) -> SynthContext<'a> {
        SynthContext {
            api: self.cloud.as_ref(),
            bindings: self
                .bindings_enabled
                .then(|| self.bindings.as_ref() as &dyn BindingApi),
            gateway: &self.gateway,
            tracking: &self.tracking,
            metrics: &self.metrics,
            features: self.features,
            poller: fast_poller(),
            vpc_id: "vpc-1",
            stack,
        }
    }

    pub async fn run_load_balancers(&self, stack: &Stack) -> Result<KindReport> {
        let ctx = self.context(stack);
        LoadBalancerSynthesizer::new(&ctx).run().await
    }

    pub async fn run_target_groups(&self, stack: &Stack) -> Result<KindReport> {
        let ctx = self.context(stack);
        TargetGroupSynthesizer::new(&ctx).run().await
    }

    pub async fn run_listeners(&self, stack: &Stack) -> Result<KindReport> {
        let ctx = self.context(stack);
        ListenerSynthesizer::new(&ctx).run().await
    }

    /// Load balancers, target groups and listeners, then rules
    pub async fn run_through_rules(&self, stack: &Stack) -> Result<KindReport> {
        self.run_load_balancers(stack).await?;
        self.run_target_groups(stack).await?;
        self.run_listeners(stack).await?;
        let ctx = self.context(stack);
        ListenerRuleSynthesizer::new(&ctx).run().await
    }

    pub async fn run_bindings(&self, stack: &Stack) -> Result<KindReport> {
        let ctx = self.context(stack);
        BindingSynthesizer::new(&ctx)?.run().await
    }

    pub fn metric(&self, stack: &StackId, cloud_resource_name: &str, cloud_resource_type: &str) -> Option<f64> {
        self.metrics
            .value(&ResourceKey::new(stack, cloud_resource_name, cloud_resource_type))
    }
}
