//! Core types for load balancer synthesis
//!
//! Desired specs are what the model asks for; `Live*` types are snapshots of
//! what the load-balancing API reports. Both sides share the same value types
//! so drift detection is a plain equality check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SynthError};

/// Tag set of a cloud resource
pub type Tags = BTreeMap<String, String>;

/// Flat attribute map of a load balancer or target group
pub type Attributes = BTreeMap<String, String>;

/// Implements `as_str`, `Display` and `FromStr` for a wire-string enum
macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire representation used by the load-balancing API
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = SynthError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(SynthError::invalid_spec(format!(
                        "unknown {} {:?}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

/// Resource kinds handled by the synthesizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    LoadBalancer,
    TargetGroup,
    Listener,
    ListenerRule,
    TargetGroupBinding,
}

wire_enum!(ResourceKind {
    LoadBalancer => "loadBalancer",
    TargetGroup => "targetGroup",
    Listener => "listener",
    ListenerRule => "listenerRule",
    TargetGroupBinding => "targetGroupBinding",
});

/// Reference to another resource in the same model
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

/// A string field that is either known up front or resolved from another
/// resource's status (its ARN) once that resource has been synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringToken {
    Literal(String),
    Reference {
        #[serde(rename = "ref")]
        reference: ResourceRef,
    },
}

impl StringToken {
    /// Literal token
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Reference to the ARN of another model resource
    pub fn reference(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::Reference {
            reference: ResourceRef {
                kind,
                id: id.into(),
            },
        }
    }
}

// ============================================================================
// Load balancers
// ============================================================================

/// Load balancer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerType {
    Application,
    Network,
    Gateway,
}

wire_enum!(LoadBalancerType {
    Application => "application",
    Network => "network",
    Gateway => "gateway",
});

/// Load balancer scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerScheme {
    InternetFacing,
    Internal,
}

wire_enum!(LoadBalancerScheme {
    InternetFacing => "internet-facing",
    Internal => "internal",
});

/// Load balancer IP address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IpAddressType {
    Ipv4,
    Dualstack,
    DualstackWithoutPublicIpv4,
}

wire_enum!(IpAddressType {
    Ipv4 => "ipv4",
    Dualstack => "dualstack",
    DualstackWithoutPublicIpv4 => "dualstack-without-public-ipv4",
});

/// Provisioning state of a load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerState {
    Active,
    Provisioning,
    ActiveImpaired,
    Failed,
}

wire_enum!(LoadBalancerState {
    Active => "active",
    Provisioning => "provisioning",
    ActiveImpaired => "active_impaired",
    Failed => "failed",
});

/// Minimum capacity reserved on a load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReservation {
    pub capacity_units: i32,
}

/// Capacity reservation as reported by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityReservationStatus {
    /// Reserved capacity units, `None` when no reservation is configured
    pub capacity_units: Option<i32>,
    /// At least one zone is still applying a previous change
    pub provisioning: bool,
}

/// Desired load balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,
    pub scheme: LoadBalancerScheme,
    #[serde(default)]
    pub ip_address_type: Option<IpAddressType>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub capacity_reservation: Option<CapacityReservation>,
    #[serde(default)]
    pub tags: Tags,
}

/// Status written back after a load balancer is synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    pub arn: String,
    pub dns_name: String,
}

/// Load balancer create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerCreate {
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub scheme: LoadBalancerScheme,
    pub ip_address_type: Option<IpAddressType>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub tags: Tags,
}

/// Load balancer as reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLoadBalancer {
    pub arn: String,
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub scheme: LoadBalancerScheme,
    pub vpc_id: Option<String>,
    pub state: Option<LoadBalancerState>,
    pub dns_name: String,
    pub ip_address_type: Option<IpAddressType>,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

// ============================================================================
// Target groups
// ============================================================================

/// Target type of a target group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Instance,
    Ip,
    Alb,
    Lambda,
}

wire_enum!(TargetType {
    Instance => "instance",
    Ip => "ip",
    Alb => "alb",
    Lambda => "lambda",
});

/// Listener / target group protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tls,
    Udp,
    TcpUdp,
    Geneve,
}

wire_enum!(Protocol {
    Http => "HTTP",
    Https => "HTTPS",
    Tcp => "TCP",
    Tls => "TLS",
    Udp => "UDP",
    TcpUdp => "TCP_UDP",
    Geneve => "GENEVE",
});

impl Protocol {
    /// Layer-4 protocols served by network load balancers
    pub fn is_connection_oriented(&self) -> bool {
        matches!(self, Self::Tcp | Self::Tls | Self::Udp | Self::TcpUdp)
    }
}

/// IP address type of a target group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetGroupIpAddressType {
    Ipv4,
    Ipv6,
}

wire_enum!(TargetGroupIpAddressType {
    Ipv4 => "ipv4",
    Ipv6 => "ipv6",
});

/// Health check success codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    #[serde(default)]
    pub http_code: Option<String>,
    #[serde(default)]
    pub grpc_code: Option<String>,
}

/// Target group health check. Unset fields mean "no opinion" on the desired
/// side and "not reported" on the live side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    pub enabled: Option<bool>,
    pub protocol: Option<Protocol>,
    pub port: Option<String>,
    pub path: Option<String>,
    pub interval_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub healthy_threshold_count: Option<i32>,
    pub unhealthy_threshold_count: Option<i32>,
    pub matcher: Option<Matcher>,
}

/// Desired target group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupSpec {
    pub name: String,
    pub target_type: TargetType,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub ip_address_type: Option<TargetGroupIpAddressType>,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub tags: Tags,
}

/// Status written back after a target group is synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupStatus {
    pub arn: String,
}

/// Target group create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroupCreate {
    pub name: String,
    pub target_type: TargetType,
    pub protocol: Option<Protocol>,
    pub protocol_version: Option<String>,
    pub port: Option<i32>,
    pub ip_address_type: Option<TargetGroupIpAddressType>,
    pub vpc_id: Option<String>,
    pub health_check: HealthCheck,
    pub tags: Tags,
}

/// Target group as reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTargetGroup {
    pub arn: String,
    pub name: String,
    pub target_type: TargetType,
    pub protocol: Option<Protocol>,
    pub protocol_version: Option<String>,
    pub port: Option<i32>,
    pub vpc_id: Option<String>,
    pub ip_address_type: Option<TargetGroupIpAddressType>,
    pub health_check: HealthCheck,
    pub load_balancer_arns: Vec<String>,
}

// ============================================================================
// Actions and rule conditions
// ============================================================================

/// Target group inside a forward action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedTargetGroup<A = String> {
    pub target_group_arn: A,
    #[serde(default)]
    pub weight: Option<i32>,
}

/// Listener or rule action. `A` is the type of target group ARNs: a
/// [`StringToken`] in the desired model, a plain `String` once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Action<A = String> {
    Forward {
        target_groups: Vec<WeightedTargetGroup<A>>,
        #[serde(default)]
        stickiness_seconds: Option<i32>,
    },
    FixedResponse {
        status_code: String,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default)]
        message_body: Option<String>,
    },
    Redirect {
        status_code: String,
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        query: Option<String>,
    },
}

impl Action<StringToken> {
    /// Resolve target group references into concrete ARNs
    pub fn resolve<F>(&self, resolve: F) -> Result<Action>
    where
        F: Fn(&StringToken) -> Result<String>,
    {
        Ok(match self {
            Action::Forward {
                target_groups,
                stickiness_seconds,
            } => Action::Forward {
                target_groups: target_groups
                    .iter()
                    .map(|tg| {
                        Ok(WeightedTargetGroup {
                            target_group_arn: resolve(&tg.target_group_arn)?,
                            weight: tg.weight,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                stickiness_seconds: *stickiness_seconds,
            },
            Action::FixedResponse {
                status_code,
                content_type,
                message_body,
            } => Action::FixedResponse {
                status_code: status_code.clone(),
                content_type: content_type.clone(),
                message_body: message_body.clone(),
            },
            Action::Redirect {
                status_code,
                protocol,
                host,
                port,
                path,
                query,
            } => Action::Redirect {
                status_code: status_code.clone(),
                protocol: protocol.clone(),
                host: host.clone(),
                port: port.clone(),
                path: path.clone(),
                query: query.clone(),
            },
        })
    }
}

/// Key/value pair of a query-string condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryStringKeyValue {
    #[serde(default)]
    pub key: Option<String>,
    pub value: String,
}

/// Listener rule condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RuleCondition {
    HostHeader { values: Vec<String> },
    PathPattern { values: Vec<String> },
    HttpHeader { header_name: String, values: Vec<String> },
    HttpRequestMethod { values: Vec<String> },
    QueryString { values: Vec<QueryStringKeyValue> },
    SourceIp { values: Vec<String> },
}

impl RuleCondition {
    /// Wire name of the condition field
    pub fn field(&self) -> &'static str {
        match self {
            Self::HostHeader { .. } => "host-header",
            Self::PathPattern { .. } => "path-pattern",
            Self::HttpHeader { .. } => "http-header",
            Self::HttpRequestMethod { .. } => "http-request-method",
            Self::QueryString { .. } => "query-string",
            Self::SourceIp { .. } => "source-ip",
        }
    }
}

// ============================================================================
// Listeners and rules
// ============================================================================

/// Desired listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    pub load_balancer_arn: StringToken,
    pub port: i32,
    pub protocol: Protocol,
    #[serde(default)]
    pub ssl_policy: Option<String>,
    /// Certificate ARNs; the first one is the listener's default certificate
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(default)]
    pub alpn_policy: Vec<String>,
    #[serde(default)]
    pub default_actions: Vec<Action<StringToken>>,
    #[serde(default)]
    pub tags: Tags,
}

/// Status written back after a listener is synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub arn: String,
}

/// Listener settings with every reference resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub load_balancer_arn: String,
    pub port: i32,
    pub protocol: Protocol,
    pub ssl_policy: Option<String>,
    pub default_certificate: Option<String>,
    pub alpn_policy: Vec<String>,
    pub default_actions: Vec<Action>,
}

/// Listener as reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveListener {
    pub arn: String,
    pub settings: ListenerSettings,
}

/// Desired listener rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub listener_arn: StringToken,
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<Action<StringToken>>,
    #[serde(default)]
    pub tags: Tags,
}

/// Status written back after a rule is synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    pub arn: String,
}

/// Rule settings with every reference resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSettings {
    pub listener_arn: String,
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<Action>,
}

/// Non-default rule as reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRule {
    pub arn: String,
    pub settings: RuleSettings,
}

// ============================================================================
// Target group bindings
// ============================================================================

/// Service port referenced by a binding (number or named port)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceReference {
    pub name: String,
    pub port: String,
}

/// Desired target group binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingSpec {
    pub name: String,
    pub namespace: String,
    pub target_group_arn: StringToken,
    #[serde(default)]
    pub target_type: Option<TargetType>,
    pub service_ref: ServiceReference,
    #[serde(default)]
    pub ip_address_type: Option<TargetGroupIpAddressType>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Binding spec as stored on the cluster object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingSettings {
    pub target_group_arn: String,
    #[serde(default)]
    pub target_type: Option<TargetType>,
    pub service_ref: ServiceReference,
    #[serde(default)]
    pub ip_address_type: Option<TargetGroupIpAddressType>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

/// Target group binding object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBinding {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    pub spec: BindingSettings,
}

impl TargetGroupBinding {
    /// The binding controller has acted on the latest spec
    pub fn is_observed(&self) -> bool {
        self.observed_generation
            .is_some_and(|observed| observed >= self.generation)
    }
}

/// Status written back after a binding is synthesized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingStatus {
    pub name: String,
    pub namespace: String,
}

// ============================================================================
// Targets
// ============================================================================

/// Registered target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescription {
    pub id: String,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub availability_zone: Option<String>,
}

impl TargetDescription {
    /// Target by id, using the target group's port
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            port: None,
            availability_zone: None,
        }
    }

    /// Set an explicit port
    pub fn with_port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }
}

/// Health state of a registered target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetHealthState {
    Initial,
    Healthy,
    Unhealthy,
    #[serde(rename = "unhealthy.draining")]
    UnhealthyDraining,
    Unused,
    Draining,
    Unavailable,
}

wire_enum!(TargetHealthState {
    Initial => "initial",
    Healthy => "healthy",
    Unhealthy => "unhealthy",
    UnhealthyDraining => "unhealthy.draining",
    Unused => "unused",
    Draining => "draining",
    Unavailable => "unavailable",
});

/// Health of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHealth {
    pub target: TargetDescription,
    pub state: Option<TargetHealthState>,
}
