//! [`LoadBalancingApi`] over the AWS SDK
//!
//! Every describe call drains its `Marker` pagination. SDK errors are reduced
//! to their service error code so not-found and in-use conditions can be
//! classified without SDK types leaking out.

use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::Client as ElbClient;
use aws_sdk_elasticloadbalancingv2::error::ProvideErrorMetadata;
use aws_sdk_elasticloadbalancingv2::types as elb;
use aws_types::region::Region;
use lbsynth_core::*;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Map an SDK error to a [`CloudError`] for `operation`
fn sdk_error<E>(operation: &'static str) -> impl FnOnce(E) -> SynthError
where
    E: ProvideErrorMetadata + fmt::Display,
{
    move |err| {
        let code = err.code().unwrap_or("Unknown").to_string();
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        CloudError::new(operation, code, message).into()
    }
}

fn missing(operation: &str, what: &str) -> SynthError {
    CloudError::new(operation, "MalformedResponse", format!("response has no {what}")).into()
}

fn parse_required<T>(what: &str, value: Option<&str>) -> Result<T>
where
    T: FromStr<Err = SynthError>,
{
    value
        .ok_or_else(|| SynthError::invalid_spec(format!("live resource has no {what}")))?
        .parse()
}

fn parse_optional<T: FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

fn sdk_tags(tags: &Tags) -> Option<Vec<elb::Tag>> {
    (!tags.is_empty()).then(|| {
        tags.iter()
            .map(|(k, v)| elb::Tag::builder().key(k).value(v).build())
            .collect()
    })
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

// ============================================================================
// Conversions from SDK shapes
// ============================================================================

fn load_balancer_from_sdk(lb: &elb::LoadBalancer) -> Result<LiveLoadBalancer> {
    Ok(LiveLoadBalancer {
        arn: lb.load_balancer_arn().unwrap_or_default().to_string(),
        name: lb.load_balancer_name().unwrap_or_default().to_string(),
        lb_type: parse_required("type", lb.r#type().map(|t| t.as_str()))?,
        scheme: parse_required("scheme", lb.scheme().map(|s| s.as_str()))?,
        vpc_id: lb.vpc_id().map(str::to_string),
        state: parse_optional(lb.state().and_then(|s| s.code()).map(|c| c.as_str())),
        dns_name: lb.dns_name().unwrap_or_default().to_string(),
        ip_address_type: parse_optional(lb.ip_address_type().map(|t| t.as_str())),
        subnets: lb
            .availability_zones()
            .iter()
            .filter_map(|az| az.subnet_id().map(str::to_string))
            .collect(),
        security_groups: lb.security_groups().to_vec(),
    })
}

fn target_group_from_sdk(tg: &elb::TargetGroup) -> Result<LiveTargetGroup> {
    Ok(LiveTargetGroup {
        arn: tg.target_group_arn().unwrap_or_default().to_string(),
        name: tg.target_group_name().unwrap_or_default().to_string(),
        target_type: parse_required("target type", tg.target_type().map(|t| t.as_str()))?,
        protocol: parse_optional(tg.protocol().map(|p| p.as_str())),
        protocol_version: tg.protocol_version().map(str::to_string),
        port: tg.port(),
        vpc_id: tg.vpc_id().map(str::to_string),
        ip_address_type: parse_optional(tg.ip_address_type().map(|t| t.as_str())),
        health_check: HealthCheck {
            enabled: tg.health_check_enabled(),
            protocol: parse_optional(tg.health_check_protocol().map(|p| p.as_str())),
            port: tg.health_check_port().map(str::to_string),
            path: tg.health_check_path().map(str::to_string),
            interval_seconds: tg.health_check_interval_seconds(),
            timeout_seconds: tg.health_check_timeout_seconds(),
            healthy_threshold_count: tg.healthy_threshold_count(),
            unhealthy_threshold_count: tg.unhealthy_threshold_count(),
            matcher: tg.matcher().map(|m| Matcher {
                http_code: m.http_code().map(str::to_string),
                grpc_code: m.grpc_code().map(str::to_string),
            }),
        },
        load_balancer_arns: tg.load_balancer_arns().to_vec(),
    })
}

fn action_from_sdk(action: &elb::Action) -> Option<Action> {
    match action.r#type()? {
        elb::ActionTypeEnum::Forward => {
            let (target_groups, stickiness_seconds) = match action.forward_config() {
                Some(config) => (
                    config
                        .target_groups()
                        .iter()
                        .filter_map(|tg| {
                            Some(WeightedTargetGroup {
                                target_group_arn: tg.target_group_arn()?.to_string(),
                                weight: tg.weight(),
                            })
                        })
                        .collect(),
                    config
                        .target_group_stickiness_config()
                        .filter(|s| s.enabled() == Some(true))
                        .and_then(|s| s.duration_seconds()),
                ),
                None => (
                    action
                        .target_group_arn()
                        .map(|arn| WeightedTargetGroup {
                            target_group_arn: arn.to_string(),
                            weight: None,
                        })
                        .into_iter()
                        .collect(),
                    None,
                ),
            };
            Some(Action::Forward {
                target_groups,
                stickiness_seconds,
            })
        }
        elb::ActionTypeEnum::FixedResponse => {
            let config = action.fixed_response_config()?;
            Some(Action::FixedResponse {
                status_code: config.status_code()?.to_string(),
                content_type: config.content_type().map(str::to_string),
                message_body: config.message_body().map(str::to_string),
            })
        }
        elb::ActionTypeEnum::Redirect => {
            let config = action.redirect_config()?;
            Some(Action::Redirect {
                status_code: config.status_code()?.as_str().to_string(),
                protocol: redirect_field(config.protocol(), "#{protocol}"),
                host: redirect_field(config.host(), "#{host}"),
                port: redirect_field(config.port(), "#{port}"),
                path: redirect_field(config.path(), "/#{path}"),
                query: redirect_field(config.query(), "#{query}"),
            })
        }
        // Authentication actions are not modelled
        _ => None,
    }
}

/// Redirect components the API fills with a request placeholder read back as unset
fn redirect_field(value: Option<&str>, placeholder: &str) -> Option<String> {
    value.filter(|v| *v != placeholder).map(str::to_string)
}

fn condition_from_sdk(condition: &elb::RuleCondition) -> Option<RuleCondition> {
    // Older rules carry their values on the condition itself
    let legacy = || condition.values().to_vec();

    Some(match condition.field()? {
        "host-header" => RuleCondition::HostHeader {
            values: condition
                .host_header_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_else(legacy),
        },
        "path-pattern" => RuleCondition::PathPattern {
            values: condition
                .path_pattern_config()
                .map(|c| c.values().to_vec())
                .unwrap_or_else(legacy),
        },
        "http-header" => {
            let config = condition.http_header_config()?;
            RuleCondition::HttpHeader {
                header_name: config.http_header_name()?.to_string(),
                values: config.values().to_vec(),
            }
        }
        "http-request-method" => RuleCondition::HttpRequestMethod {
            values: condition.http_request_method_config()?.values().to_vec(),
        },
        "query-string" => RuleCondition::QueryString {
            values: condition
                .query_string_config()?
                .values()
                .iter()
                .map(|kv| QueryStringKeyValue {
                    key: kv.key().map(str::to_string),
                    value: kv.value().unwrap_or_default().to_string(),
                })
                .collect(),
        },
        "source-ip" => RuleCondition::SourceIp {
            values: condition.source_ip_config()?.values().to_vec(),
        },
        _ => return None,
    })
}

// ============================================================================
// Conversions to SDK shapes
// ============================================================================

fn action_to_sdk(action: &Action, order: i32) -> elb::Action {
    let builder = elb::Action::builder().order(order);

    match action {
        Action::Forward {
            target_groups,
            stickiness_seconds,
        } => {
            let tuples = target_groups
                .iter()
                .map(|tg| {
                    elb::TargetGroupTuple::builder()
                        .target_group_arn(&tg.target_group_arn)
                        .set_weight(tg.weight)
                        .build()
                })
                .collect();
            let stickiness = stickiness_seconds.map(|seconds| {
                elb::TargetGroupStickinessConfig::builder()
                    .enabled(true)
                    .duration_seconds(seconds)
                    .build()
            });

            builder
                .r#type(elb::ActionTypeEnum::Forward)
                .forward_config(
                    elb::ForwardActionConfig::builder()
                        .set_target_groups(Some(tuples))
                        .set_target_group_stickiness_config(stickiness)
                        .build(),
                )
                .build()
        }
        Action::FixedResponse {
            status_code,
            content_type,
            message_body,
        } => builder
            .r#type(elb::ActionTypeEnum::FixedResponse)
            .fixed_response_config(
                elb::FixedResponseActionConfig::builder()
                    .status_code(status_code)
                    .set_content_type(content_type.clone())
                    .set_message_body(message_body.clone())
                    .build(),
            )
            .build(),
        Action::Redirect {
            status_code,
            protocol,
            host,
            port,
            path,
            query,
        } => builder
            .r#type(elb::ActionTypeEnum::Redirect)
            .redirect_config(
                elb::RedirectActionConfig::builder()
                    .status_code(elb::RedirectActionStatusCodeEnum::from(status_code.as_str()))
                    .set_protocol(protocol.clone())
                    .set_host(host.clone())
                    .set_port(port.clone())
                    .set_path(path.clone())
                    .set_query(query.clone())
                    .build(),
            )
            .build(),
    }
}

fn actions_to_sdk(actions: &[Action]) -> Vec<elb::Action> {
    actions
        .iter()
        .zip(1..)
        .map(|(action, order)| action_to_sdk(action, order))
        .collect()
}

fn condition_to_sdk(condition: &RuleCondition) -> elb::RuleCondition {
    let builder = elb::RuleCondition::builder().field(condition.field());

    match condition {
        RuleCondition::HostHeader { values } => builder.host_header_config(
            elb::HostHeaderConditionConfig::builder()
                .set_values(Some(values.clone()))
                .build(),
        ),
        RuleCondition::PathPattern { values } => builder.path_pattern_config(
            elb::PathPatternConditionConfig::builder()
                .set_values(Some(values.clone()))
                .build(),
        ),
        RuleCondition::HttpHeader {
            header_name,
            values,
        } => builder.http_header_config(
            elb::HttpHeaderConditionConfig::builder()
                .http_header_name(header_name)
                .set_values(Some(values.clone()))
                .build(),
        ),
        RuleCondition::HttpRequestMethod { values } => builder.http_request_method_config(
            elb::HttpRequestMethodConditionConfig::builder()
                .set_values(Some(values.clone()))
                .build(),
        ),
        RuleCondition::QueryString { values } => builder.query_string_config(
            elb::QueryStringConditionConfig::builder()
                .set_values(Some(
                    values
                        .iter()
                        .map(|kv| {
                            elb::QueryStringKeyValuePair::builder()
                                .set_key(kv.key.clone())
                                .value(&kv.value)
                                .build()
                        })
                        .collect(),
                ))
                .build(),
        ),
        RuleCondition::SourceIp { values } => builder.source_ip_config(
            elb::SourceIpConditionConfig::builder()
                .set_values(Some(values.clone()))
                .build(),
        ),
    }
    .build()
}

fn matcher_to_sdk(matcher: &Option<Matcher>) -> Option<elb::Matcher> {
    matcher.as_ref().map(|m| {
        elb::Matcher::builder()
            .set_http_code(m.http_code.clone())
            .set_grpc_code(m.grpc_code.clone())
            .build()
    })
}

fn target_to_sdk(target: &TargetDescription) -> elb::TargetDescription {
    elb::TargetDescription::builder()
        .id(&target.id)
        .set_port(target.port)
        .set_availability_zone(target.availability_zone.clone())
        .build()
}

fn certificate(arn: &str) -> elb::Certificate {
    elb::Certificate::builder().certificate_arn(arn).build()
}

// ============================================================================
// Client
// ============================================================================

/// Elastic load-balancing client
#[derive(Clone)]
pub struct AwsLoadBalancingApi {
    client: ElbClient,
}

impl AwsLoadBalancingApi {
    pub fn new(client: ElbClient) -> Self {
        Self { client }
    }

    /// Create from AWS config
    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self::new(ElbClient::new(config))
    }

    fn listener_from_sdk(listener: &elb::Listener) -> Result<LiveListener> {
        Ok(LiveListener {
            arn: listener.listener_arn().unwrap_or_default().to_string(),
            settings: ListenerSettings {
                load_balancer_arn: listener.load_balancer_arn().unwrap_or_default().to_string(),
                port: listener
                    .port()
                    .ok_or_else(|| missing("DescribeListeners", "listener port"))?,
                protocol: parse_required("protocol", listener.protocol().map(|p| p.as_str()))?,
                ssl_policy: listener.ssl_policy().map(str::to_string),
                default_certificate: listener
                    .certificates()
                    .first()
                    .and_then(|c| c.certificate_arn())
                    .map(str::to_string),
                alpn_policy: listener.alpn_policy().to_vec(),
                default_actions: listener
                    .default_actions()
                    .iter()
                    .filter_map(action_from_sdk)
                    .collect(),
            },
        })
    }
}

/// Create an ELB client from the default AWS config, optionally pinned to a region
pub async fn create_elb_client(region: Option<&str>) -> ElbClient {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    ElbClient::new(&loader.load().await)
}

#[async_trait]
impl LoadBalancingApi for AwsLoadBalancingApi {
    async fn describe_load_balancers(&self) -> Result<Vec<LiveLoadBalancer>> {
        let mut load_balancers = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .describe_load_balancers()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(sdk_error("DescribeLoadBalancers"))?;

            for lb in page.load_balancers() {
                load_balancers.push(load_balancer_from_sdk(lb)?);
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        debug!(count = load_balancers.len(), "Described load balancers");
        Ok(load_balancers)
    }

    async fn create_load_balancer(&self, request: &LoadBalancerCreate) -> Result<LiveLoadBalancer> {
        let output = self
            .client
            .create_load_balancer()
            .name(&request.name)
            .r#type(elb::LoadBalancerTypeEnum::from(request.lb_type.as_str()))
            .scheme(elb::LoadBalancerSchemeEnum::from(request.scheme.as_str()))
            .set_ip_address_type(
                request
                    .ip_address_type
                    .map(|t| elb::IpAddressType::from(t.as_str())),
            )
            .set_subnets(non_empty(&request.subnets))
            .set_security_groups(non_empty(&request.security_groups))
            .set_tags(sdk_tags(&request.tags))
            .send()
            .await
            .map_err(sdk_error("CreateLoadBalancer"))?;

        let lb = output
            .load_balancers()
            .first()
            .ok_or_else(|| missing("CreateLoadBalancer", "load balancer"))?;
        load_balancer_from_sdk(lb)
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        self.client
            .delete_load_balancer()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DeleteLoadBalancer"))?;
        Ok(())
    }

    async fn set_subnets(&self, arn: &str, subnets: &[String]) -> Result<()> {
        self.client
            .set_subnets()
            .load_balancer_arn(arn)
            .set_subnets(Some(subnets.to_vec()))
            .send()
            .await
            .map_err(sdk_error("SetSubnets"))?;
        Ok(())
    }

    async fn set_security_groups(&self, arn: &str, security_groups: &[String]) -> Result<()> {
        self.client
            .set_security_groups()
            .load_balancer_arn(arn)
            .set_security_groups(Some(security_groups.to_vec()))
            .send()
            .await
            .map_err(sdk_error("SetSecurityGroups"))?;
        Ok(())
    }

    async fn set_ip_address_type(&self, arn: &str, ip_address_type: IpAddressType) -> Result<()> {
        self.client
            .set_ip_address_type()
            .load_balancer_arn(arn)
            .ip_address_type(elb::IpAddressType::from(ip_address_type.as_str()))
            .send()
            .await
            .map_err(sdk_error("SetIpAddressType"))?;
        Ok(())
    }

    async fn describe_load_balancer_attributes(&self, arn: &str) -> Result<Attributes> {
        let output = self
            .client
            .describe_load_balancer_attributes()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DescribeLoadBalancerAttributes"))?;

        Ok(output
            .attributes()
            .iter()
            .filter_map(|a| Some((a.key()?.to_string(), a.value().unwrap_or_default().to_string())))
            .collect())
    }

    async fn modify_load_balancer_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()> {
        let attributes = attributes
            .iter()
            .map(|(k, v)| elb::LoadBalancerAttribute::builder().key(k).value(v).build())
            .collect();

        self.client
            .modify_load_balancer_attributes()
            .load_balancer_arn(arn)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(sdk_error("ModifyLoadBalancerAttributes"))?;
        Ok(())
    }

    async fn describe_capacity_reservation(&self, arn: &str) -> Result<CapacityReservationStatus> {
        let output = self
            .client
            .describe_capacity_reservation()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DescribeCapacityReservation"))?;

        let provisioning = output.capacity_reservation_state().iter().any(|zone| {
            matches!(
                zone.state().and_then(|s| s.code()),
                Some(elb::CapacityReservationStateEnum::Pending)
                    | Some(elb::CapacityReservationStateEnum::Rebalancing)
            )
        });

        Ok(CapacityReservationStatus {
            capacity_units: output
                .minimum_load_balancer_capacity()
                .and_then(|c| c.capacity_units()),
            provisioning,
        })
    }

    async fn modify_capacity_reservation(&self, arn: &str, capacity_units: i32) -> Result<()> {
        self.client
            .modify_capacity_reservation()
            .load_balancer_arn(arn)
            .minimum_load_balancer_capacity(
                elb::MinimumLoadBalancerCapacity::builder()
                    .capacity_units(capacity_units)
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error("ModifyCapacityReservation"))?;
        Ok(())
    }

    async fn reset_capacity_reservation(&self, arn: &str) -> Result<()> {
        self.client
            .modify_capacity_reservation()
            .load_balancer_arn(arn)
            .reset_capacity_reservation(true)
            .send()
            .await
            .map_err(sdk_error("ResetCapacityReservation"))?;
        Ok(())
    }

    async fn describe_target_groups(&self) -> Result<Vec<LiveTargetGroup>> {
        let mut target_groups = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .describe_target_groups()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(sdk_error("DescribeTargetGroups"))?;

            for tg in page.target_groups() {
                target_groups.push(target_group_from_sdk(tg)?);
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        debug!(count = target_groups.len(), "Described target groups");
        Ok(target_groups)
    }

    async fn create_target_group(&self, request: &TargetGroupCreate) -> Result<LiveTargetGroup> {
        let hc = &request.health_check;
        let output = self
            .client
            .create_target_group()
            .name(&request.name)
            .target_type(elb::TargetTypeEnum::from(request.target_type.as_str()))
            .set_protocol(request.protocol.map(|p| elb::ProtocolEnum::from(p.as_str())))
            .set_protocol_version(request.protocol_version.clone())
            .set_port(request.port)
            .set_vpc_id(request.vpc_id.clone())
            .set_ip_address_type(
                request
                    .ip_address_type
                    .map(|t| elb::TargetGroupIpAddressTypeEnum::from(t.as_str())),
            )
            .set_health_check_enabled(hc.enabled)
            .set_health_check_protocol(hc.protocol.map(|p| elb::ProtocolEnum::from(p.as_str())))
            .set_health_check_port(hc.port.clone())
            .set_health_check_path(hc.path.clone())
            .set_health_check_interval_seconds(hc.interval_seconds)
            .set_health_check_timeout_seconds(hc.timeout_seconds)
            .set_healthy_threshold_count(hc.healthy_threshold_count)
            .set_unhealthy_threshold_count(hc.unhealthy_threshold_count)
            .set_matcher(matcher_to_sdk(&hc.matcher))
            .set_tags(sdk_tags(&request.tags))
            .send()
            .await
            .map_err(sdk_error("CreateTargetGroup"))?;

        let tg = output
            .target_groups()
            .first()
            .ok_or_else(|| missing("CreateTargetGroup", "target group"))?;
        target_group_from_sdk(tg)
    }

    async fn modify_target_group(&self, arn: &str, health_check: &HealthCheck) -> Result<()> {
        let hc = health_check;
        self.client
            .modify_target_group()
            .target_group_arn(arn)
            .set_health_check_enabled(hc.enabled)
            .set_health_check_protocol(hc.protocol.map(|p| elb::ProtocolEnum::from(p.as_str())))
            .set_health_check_port(hc.port.clone())
            .set_health_check_path(hc.path.clone())
            .set_health_check_interval_seconds(hc.interval_seconds)
            .set_health_check_timeout_seconds(hc.timeout_seconds)
            .set_healthy_threshold_count(hc.healthy_threshold_count)
            .set_unhealthy_threshold_count(hc.unhealthy_threshold_count)
            .set_matcher(matcher_to_sdk(&hc.matcher))
            .send()
            .await
            .map_err(sdk_error("ModifyTargetGroup"))?;
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        self.client
            .delete_target_group()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DeleteTargetGroup"))?;
        Ok(())
    }

    async fn describe_target_group_attributes(&self, arn: &str) -> Result<Attributes> {
        let output = self
            .client
            .describe_target_group_attributes()
            .target_group_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DescribeTargetGroupAttributes"))?;

        Ok(output
            .attributes()
            .iter()
            .filter_map(|a| Some((a.key()?.to_string(), a.value().unwrap_or_default().to_string())))
            .collect())
    }

    async fn modify_target_group_attributes(&self, arn: &str, attributes: &Attributes) -> Result<()> {
        let attributes = attributes
            .iter()
            .map(|(k, v)| elb::TargetGroupAttribute::builder().key(k).value(v).build())
            .collect();

        self.client
            .modify_target_group_attributes()
            .target_group_arn(arn)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(sdk_error("ModifyTargetGroupAttributes"))?;
        Ok(())
    }

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<LiveListener>> {
        let mut listeners = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .describe_listeners()
                .load_balancer_arn(load_balancer_arn)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(sdk_error("DescribeListeners"))?;

            for listener in page.listeners() {
                listeners.push(Self::listener_from_sdk(listener)?);
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(listeners)
    }

    async fn create_listener(&self, settings: &ListenerSettings, tags: &Tags) -> Result<LiveListener> {
        let output = self
            .client
            .create_listener()
            .load_balancer_arn(&settings.load_balancer_arn)
            .port(settings.port)
            .protocol(elb::ProtocolEnum::from(settings.protocol.as_str()))
            .set_ssl_policy(settings.ssl_policy.clone())
            .set_certificates(settings.default_certificate.as_deref().map(|c| vec![certificate(c)]))
            .set_alpn_policy(non_empty(&settings.alpn_policy))
            .set_default_actions(Some(actions_to_sdk(&settings.default_actions)))
            .set_tags(sdk_tags(tags))
            .send()
            .await
            .map_err(sdk_error("CreateListener"))?;

        let listener = output
            .listeners()
            .first()
            .ok_or_else(|| missing("CreateListener", "listener"))?;
        Self::listener_from_sdk(listener)
    }

    async fn modify_listener(&self, arn: &str, settings: &ListenerSettings) -> Result<()> {
        self.client
            .modify_listener()
            .listener_arn(arn)
            .port(settings.port)
            .protocol(elb::ProtocolEnum::from(settings.protocol.as_str()))
            .set_ssl_policy(settings.ssl_policy.clone())
            .set_certificates(settings.default_certificate.as_deref().map(|c| vec![certificate(c)]))
            .set_alpn_policy(non_empty(&settings.alpn_policy))
            .set_default_actions(Some(actions_to_sdk(&settings.default_actions)))
            .send()
            .await
            .map_err(sdk_error("ModifyListener"))?;
        Ok(())
    }

    async fn delete_listener(&self, arn: &str) -> Result<()> {
        self.client
            .delete_listener()
            .listener_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DeleteListener"))?;
        Ok(())
    }

    async fn describe_listener_certificates(&self, arn: &str) -> Result<Vec<String>> {
        let mut certificates = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .describe_listener_certificates()
                .listener_arn(arn)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(sdk_error("DescribeListenerCertificates"))?;

            certificates.extend(
                page.certificates()
                    .iter()
                    .filter(|c| c.is_default() != Some(true))
                    .filter_map(|c| c.certificate_arn().map(str::to_string)),
            );

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(certificates)
    }

    async fn add_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()> {
        self.client
            .add_listener_certificates()
            .listener_arn(arn)
            .set_certificates(Some(certificates.iter().map(|c| certificate(c)).collect()))
            .send()
            .await
            .map_err(sdk_error("AddListenerCertificates"))?;
        Ok(())
    }

    async fn remove_listener_certificates(&self, arn: &str, certificates: &[String]) -> Result<()> {
        self.client
            .remove_listener_certificates()
            .listener_arn(arn)
            .set_certificates(Some(certificates.iter().map(|c| certificate(c)).collect()))
            .send()
            .await
            .map_err(sdk_error("RemoveListenerCertificates"))?;
        Ok(())
    }

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<LiveRule>> {
        let mut rules = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .describe_rules()
                .listener_arn(listener_arn)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(sdk_error("DescribeRules"))?;

            for rule in page.rules() {
                if rule.is_default() == Some(true) {
                    continue;
                }
                let priority = rule
                    .priority()
                    .and_then(|p| p.parse::<i32>().ok())
                    .ok_or_else(|| missing("DescribeRules", "numeric rule priority"))?;

                rules.push(LiveRule {
                    arn: rule.rule_arn().unwrap_or_default().to_string(),
                    settings: RuleSettings {
                        listener_arn: listener_arn.to_string(),
                        priority,
                        conditions: rule.conditions().iter().filter_map(condition_from_sdk).collect(),
                        actions: rule.actions().iter().filter_map(action_from_sdk).collect(),
                    },
                });
            }

            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }

        Ok(rules)
    }

    async fn create_rule(&self, settings: &RuleSettings, tags: &Tags) -> Result<LiveRule> {
        let output = self
            .client
            .create_rule()
            .listener_arn(&settings.listener_arn)
            .priority(settings.priority)
            .set_conditions(Some(settings.conditions.iter().map(condition_to_sdk).collect()))
            .set_actions(Some(actions_to_sdk(&settings.actions)))
            .set_tags(sdk_tags(tags))
            .send()
            .await
            .map_err(sdk_error("CreateRule"))?;

        let arn = output
            .rules()
            .first()
            .and_then(|r| r.rule_arn())
            .ok_or_else(|| missing("CreateRule", "rule ARN"))?;

        Ok(LiveRule {
            arn: arn.to_string(),
            settings: settings.clone(),
        })
    }

    async fn modify_rule(&self, arn: &str, settings: &RuleSettings) -> Result<()> {
        self.client
            .modify_rule()
            .rule_arn(arn)
            .set_conditions(Some(settings.conditions.iter().map(condition_to_sdk).collect()))
            .set_actions(Some(actions_to_sdk(&settings.actions)))
            .send()
            .await
            .map_err(sdk_error("ModifyRule"))?;
        Ok(())
    }

    async fn delete_rule(&self, arn: &str) -> Result<()> {
        self.client
            .delete_rule()
            .rule_arn(arn)
            .send()
            .await
            .map_err(sdk_error("DeleteRule"))?;
        Ok(())
    }

    async fn describe_tags(&self, arns: &[String]) -> Result<BTreeMap<String, Tags>> {
        let output = self
            .client
            .describe_tags()
            .set_resource_arns(Some(arns.to_vec()))
            .send()
            .await
            .map_err(sdk_error("DescribeTags"))?;

        Ok(output
            .tag_descriptions()
            .iter()
            .filter_map(|desc| {
                let tags = desc
                    .tags()
                    .iter()
                    .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
                    .collect();
                Some((desc.resource_arn()?.to_string(), tags))
            })
            .collect())
    }

    async fn add_tags(&self, arn: &str, tags: &Tags) -> Result<()> {
        self.client
            .add_tags()
            .resource_arns(arn)
            .set_tags(sdk_tags(tags))
            .send()
            .await
            .map_err(sdk_error("AddTags"))?;
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<()> {
        self.client
            .remove_tags()
            .resource_arns(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(sdk_error("RemoveTags"))?;
        Ok(())
    }

    async fn register_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        self.client
            .register_targets()
            .target_group_arn(target_group_arn)
            .set_targets(Some(targets.iter().map(target_to_sdk).collect()))
            .send()
            .await
            .map_err(sdk_error("RegisterTargets"))?;
        Ok(())
    }

    async fn deregister_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> Result<()> {
        self.client
            .deregister_targets()
            .target_group_arn(target_group_arn)
            .set_targets(Some(targets.iter().map(target_to_sdk).collect()))
            .send()
            .await
            .map_err(sdk_error("DeregisterTargets"))?;
        Ok(())
    }

    async fn describe_target_health(
        &self,
        target_group_arn: &str,
        targets: &[TargetDescription],
    ) -> Result<Vec<TargetHealth>> {
        let targets = (!targets.is_empty()).then(|| targets.iter().map(target_to_sdk).collect());
        let output = self
            .client
            .describe_target_health()
            .target_group_arn(target_group_arn)
            .set_targets(targets)
            .send()
            .await
            .map_err(sdk_error("DescribeTargetHealth"))?;

        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(|desc| {
                let target = desc.target()?;
                Some(TargetHealth {
                    target: TargetDescription {
                        id: target.id()?.to_string(),
                        port: target.port(),
                        availability_zone: target.availability_zone().map(str::to_string),
                    },
                    state: parse_optional(
                        desc.target_health()
                            .and_then(|h| h.state())
                            .map(|s| s.as_str()),
                    ),
                })
            })
            .collect())
    }
}
