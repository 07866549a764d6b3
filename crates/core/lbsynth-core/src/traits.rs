//! Collaborator traits for load balancer synthesis
//!
//! The synthesizers work through these interfaces ONLY - never concrete SDK
//! clients. Implementations are expected to drain pagination and to retry
//! throttled calls on their own.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::*;

/// Elastic load-balancing API, reduced to the calls the synthesizers make
#[async_trait]
pub trait LoadBalancingApi: Send + Sync {
    /// Load balancers
    async fn describe_load_balancers(&self) -> Result<Vec<LiveLoadBalancer>>;
    async fn create_load_balancer(&self, request: &LoadBalancerCreate) -> Result<LiveLoadBalancer>;
    async fn delete_load_balancer(&self, arn: &str) -> Result<()>;
    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<()>;
    async fn set_security_groups(&self, arn: &str, security_groups: &[String]) -> Result<()>;
    async fn set_ip_address_type(&self, arn: &str, ip_address_type: IpAddressType) -> Result<()>;
    async fn describe_load_balancer_attributes(&self, arn: &str) -> Result<Attributes>;
    async fn modify_load_balancer_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()>;

    /// Capacity reservation
    async fn describe_capacity_reservation(&self, arn: &str) -> Result<CapacityReservationStatus>;
    async fn modify_capacity_reservation(&self, arn: &str, capacity_units: i32) -> Result<()>;
    async fn reset_capacity_reservation(&self, arn: &str) -> Result<()>;

    /// Target groups
    async fn describe_target_groups(&self) -> Result<Vec<LiveTargetGroup>>;
    async fn create_target_group(&self, request: &TargetGroupCreate) -> Result<LiveTargetGroup>;
    async fn modify_target_group(&self, arn: &str, health_check: &HealthCheck) -> Result<()>;
    async fn delete_target_group(&self, arn: &str) -> Result<()>;
    async fn describe_target_group_attributes(&self, arn: &str) -> Result<Attributes>;
    async fn modify_target_group_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()>;

    /// Listeners
    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<LiveListener>>;
    async fn create_listener(&self, settings: &ListenerSettings, tags: &Tags) -> Result<LiveListener>;
    async fn modify_listener(&self, arn: &str, settings: &ListenerSettings) -> Result<()>;
    async fn delete_listener(&self, arn: &str) -> Result<()>;
    /// Non-default certificates of a listener
    async fn describe_listener_certificates(&self, arn: &str) -> Result<Vec<String>>;
    async fn add_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()>;
    async fn remove_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()>;

    /// Listener rules (the default rule is never returned)
    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<LiveRule>>;
    async fn create_rule(&self, settings: &RuleSettings, tags: &Tags) -> Result<LiveRule>;
    async fn modify_rule(&self, arn: &str, settings: &RuleSettings) -> Result<()>;
    async fn delete_rule(&self, arn: &str) -> Result<()>;

    /// Tags, keyed by resource ARN
    async fn describe_tags(&self, arns: &[String]) -> Result<BTreeMap<String, Tags>>;
    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<()>;
    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<()>;

    /// Targets
    async fn register_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()>;
    async fn deregister_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()>;
    async fn describe_target_health(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<Vec<TargetHealth>>;
}

/// Cluster API for target group binding objects
#[async_trait]
pub trait BindingApi: Send + Sync {
    /// List bindings whose labels contain every entry of `labels`
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<TargetGroupBinding>>;
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<TargetGroupBinding>>;
    async fn create(&self, binding: &TargetGroupBinding) -> Result<TargetGroupBinding>;
    /// Replace labels and spec; returns the object with its new generation
    async fn patch(&self, binding: &TargetGroupBinding) -> Result<TargetGroupBinding>;
    /// Delete a binding; an already-deleted binding is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}
