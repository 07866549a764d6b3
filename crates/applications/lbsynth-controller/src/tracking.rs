//! Resource tracking via tags
//!
//! Every cloud resource the controller creates carries three tracking tags:
//!
//! 1. `elbv2.k8s.aws/cluster=<cluster-name>`
//! 2. `ingress.k8s.aws/stack=<stack-id>`
//! 3. `ingress.k8s.aws/resource=<logical-id>`
//!
//! The first two select a stack's resources; the third pairs a live resource
//! with its desired counterpart. Target group bindings carry the same
//! information as labels.

use crate::config::ControllerConfig;
use crate::model::StackId;
use crate::tagging::TagFilter;
use lbsynth_core::Tags;
use std::collections::BTreeMap;

/// Tag key for cluster ownership
pub const CLUSTER_TAG_KEY: &str = "elbv2.k8s.aws/cluster";

/// Tag key for stack membership
pub const STACK_TAG_KEY: &str = "ingress.k8s.aws/stack";

/// Tag key for the logical resource id
pub const RESOURCE_TAG_KEY: &str = "ingress.k8s.aws/resource";

/// Legacy tag keys written by the previous generation of the controller
pub const LEGACY_NAMESPACE_TAG_KEY: &str = "kubernetes.io/namespace";
pub const LEGACY_INGRESS_NAME_TAG_KEY: &str = "kubernetes.io/ingress-name";
pub const LEGACY_CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";

/// Binding labels (label values cannot carry the `/` of a stack id)
pub const STACK_NAMESPACE_LABEL: &str = "ingress.k8s.aws/stack-namespace";
pub const STACK_NAME_LABEL: &str = "ingress.k8s.aws/stack-name";
pub const RESOURCE_LABEL: &str = "ingress.k8s.aws/resource";

/// Whether a tag key is owned by the tracking scheme
pub fn is_reserved_tag_key(key: &str) -> bool {
    key == CLUSTER_TAG_KEY || key == STACK_TAG_KEY || key == RESOURCE_TAG_KEY
}

/// Computes tracking tags and tag filters for stacks
#[derive(Debug, Clone)]
pub struct TrackingProvider {
    cluster_name: String,
    default_tags: Tags,
    external_managed_tags: Vec<String>,
}

impl TrackingProvider {
    /// Create a tracking provider from the controller configuration
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            default_tags: config.default_tags.clone(),
            external_managed_tags: config.external_managed_tags.clone(),
        }
    }

    /// Tag key whose value is a resource's logical id
    pub fn resource_id_tag_key(&self) -> &'static str {
        RESOURCE_TAG_KEY
    }

    /// Tags shared by every resource of a stack
    pub fn stack_tags(&self, stack: &StackId) -> Tags {
        Tags::from([
            (CLUSTER_TAG_KEY.to_string(), self.cluster_name.clone()),
            (STACK_TAG_KEY.to_string(), stack.to_string()),
        ])
    }

    /// Full tag set for a resource: default tags, then the resource's own tags, then
    /// the tracking tags (which always win)
    pub fn resource_tags(&self, stack: &StackId, resource_id: &str, spec_tags: &Tags) -> Tags {
        let mut tags = self.default_tags.clone();
        tags.extend(spec_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags.extend(self.stack_tags(stack));
        tags.insert(RESOURCE_TAG_KEY.to_string(), resource_id.to_string());
        tags
    }

    /// Filters selecting a stack's resources. Namespaced stacks also match the
    /// legacy tag layout.
    pub fn stack_tag_filters(&self, stack: &StackId) -> Vec<TagFilter> {
        let mut filters = vec![TagFilter::from([
            (CLUSTER_TAG_KEY.to_string(), vec![self.cluster_name.clone()]),
            (STACK_TAG_KEY.to_string(), vec![stack.to_string()]),
        ])];

        if let Some(namespace) = &stack.namespace {
            filters.push(TagFilter::from([
                (
                    format!("{}{}", LEGACY_CLUSTER_TAG_PREFIX, self.cluster_name),
                    vec!["owned".to_string(), "shared".to_string()],
                ),
                (LEGACY_NAMESPACE_TAG_KEY.to_string(), vec![namespace.clone()]),
                (LEGACY_INGRESS_NAME_TAG_KEY.to_string(), vec![stack.name.clone()]),
            ]));
        }

        filters
    }

    /// Tag keys that tag reconciliation must never add or remove
    pub fn ignored_tag_keys(&self) -> Vec<String> {
        let mut keys = self.external_managed_tags.clone();
        keys.extend([
            LEGACY_NAMESPACE_TAG_KEY.to_string(),
            LEGACY_INGRESS_NAME_TAG_KEY.to_string(),
            format!("{}{}", LEGACY_CLUSTER_TAG_PREFIX, self.cluster_name),
        ]);
        keys
    }

    /// Labels selecting a stack's target group bindings
    pub fn stack_labels(&self, stack: &StackId) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([(STACK_NAME_LABEL.to_string(), stack.name.clone())]);
        if let Some(namespace) = &stack.namespace {
            labels.insert(STACK_NAMESPACE_LABEL.to_string(), namespace.clone());
        }
        labels
    }

    /// Full label set for a binding
    pub fn binding_labels(
        &self,
        stack: &StackId,
        resource_id: &str,
        spec_labels: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut labels = spec_labels.clone();
        labels.extend(self.stack_labels(stack));
        labels.insert(RESOURCE_LABEL.to_string(), resource_id.to_string());
        labels
    }
}
