//! Desired model of one stack
//!
//! A stack is the set of resources one routing intent (an ingress group, a
//! service) needs. The synthesizers read specs and write status; status is the
//! only thing that changes during a pass.

use lbsynth_core::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Identity of a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackId {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl StackId {
    /// Cluster-scoped stack
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Namespaced stack
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One desired resource: logical id, spec and the status synthesis writes back
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelResource<S, T> {
    pub id: String,
    pub spec: S,
    #[serde(skip, default = "no_status")]
    status: RwLock<Option<T>>,
}

fn no_status<T>() -> RwLock<Option<T>> {
    RwLock::new(None)
}

impl<S, T: Clone> ModelResource<S, T> {
    pub fn new(id: impl Into<String>, spec: S) -> Self {
        Self {
            id: id.into(),
            spec,
            status: RwLock::new(None),
        }
    }

    /// Status written by the last synthesis, if any
    pub fn status(&self) -> Option<T> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_status(&self, status: T) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

pub type LoadBalancerResource = ModelResource<LoadBalancerSpec, LoadBalancerStatus>;
pub type TargetGroupResource = ModelResource<TargetGroupSpec, TargetGroupStatus>;
pub type ListenerResource = ModelResource<ListenerSpec, ListenerStatus>;
pub type ListenerRuleResource = ModelResource<RuleSpec, RuleStatus>;
pub type TargetGroupBindingResource =
    ModelResource<TargetGroupBindingSpec, TargetGroupBindingStatus>;

/// Desired model of a stack
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub id: StackId,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerResource>,
    #[serde(default)]
    pub target_groups: Vec<TargetGroupResource>,
    #[serde(default)]
    pub listeners: Vec<ListenerResource>,
    #[serde(default)]
    pub listener_rules: Vec<ListenerRuleResource>,
    #[serde(default)]
    pub target_group_bindings: Vec<TargetGroupBindingResource>,
}

impl Stack {
    /// Empty stack
    pub fn new(id: StackId) -> Self {
        Self {
            id,
            load_balancers: Vec::new(),
            target_groups: Vec::new(),
            listeners: Vec::new(),
            listener_rules: Vec::new(),
            target_group_bindings: Vec::new(),
        }
    }

    /// Load a stack model from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SynthError::invalid_spec(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn with_load_balancer(mut self, id: &str, spec: LoadBalancerSpec) -> Self {
        self.load_balancers.push(ModelResource::new(id, spec));
        self
    }

    pub fn with_target_group(mut self, id: &str, spec: TargetGroupSpec) -> Self {
        self.target_groups.push(ModelResource::new(id, spec));
        self
    }

    pub fn with_listener(mut self, id: &str, spec: ListenerSpec) -> Self {
        self.listeners.push(ModelResource::new(id, spec));
        self
    }

    pub fn with_listener_rule(mut self, id: &str, spec: RuleSpec) -> Self {
        self.listener_rules.push(ModelResource::new(id, spec));
        self
    }

    pub fn with_target_group_binding(mut self, id: &str, spec: TargetGroupBindingSpec) -> Self {
        self.target_group_bindings.push(ModelResource::new(id, spec));
        self
    }

    /// Total number of desired resources
    pub fn resource_count(&self) -> usize {
        self.load_balancers.len()
            + self.target_groups.len()
            + self.listeners.len()
            + self.listener_rules.len()
            + self.target_group_bindings.len()
    }

    /// Logical ids must be unique per kind
    pub fn validate(&self) -> Result<()> {
        check_unique(ResourceKind::LoadBalancer, self.load_balancers.iter().map(|r| &r.id))?;
        check_unique(ResourceKind::TargetGroup, self.target_groups.iter().map(|r| &r.id))?;
        check_unique(ResourceKind::Listener, self.listeners.iter().map(|r| &r.id))?;
        check_unique(ResourceKind::ListenerRule, self.listener_rules.iter().map(|r| &r.id))?;
        check_unique(
            ResourceKind::TargetGroupBinding,
            self.target_group_bindings.iter().map(|r| &r.id),
        )?;
        Ok(())
    }

    /// Resolve a token to a concrete ARN.
    ///
    /// A reference to a resource that exists in the model but has not been
    /// synthesized yet is an [`SynthError::UnresolvedReference`].
    pub fn resolve(&self, token: &StringToken) -> Result<String> {
        let reference = match token {
            StringToken::Literal(value) => return Ok(value.clone()),
            StringToken::Reference { reference } => reference,
        };

        let arn = match reference.kind {
            ResourceKind::LoadBalancer => {
                lookup(&self.load_balancers, reference)?.status().map(|s| s.arn)
            }
            ResourceKind::TargetGroup => {
                lookup(&self.target_groups, reference)?.status().map(|s| s.arn)
            }
            ResourceKind::Listener => lookup(&self.listeners, reference)?.status().map(|s| s.arn),
            ResourceKind::ListenerRule => {
                lookup(&self.listener_rules, reference)?.status().map(|s| s.arn)
            }
            ResourceKind::TargetGroupBinding => {
                return Err(SynthError::invalid_spec(format!(
                    "target group binding {} has no ARN to reference",
                    reference.id
                )));
            }
        };

        arn.ok_or_else(|| SynthError::UnresolvedReference {
            kind: reference.kind.to_string(),
            id: reference.id.clone(),
        })
    }
}

fn lookup<'a, S, T>(
    resources: &'a [ModelResource<S, T>],
    reference: &ResourceRef,
) -> Result<&'a ModelResource<S, T>> {
    resources
        .iter()
        .find(|r| r.id == reference.id)
        .ok_or_else(|| {
            SynthError::invalid_spec(format!(
                "reference to unknown {} {}",
                reference.kind, reference.id
            ))
        })
}

fn check_unique<'a>(kind: ResourceKind, ids: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(SynthError::DuplicateKey {
                kind: kind.to_string(),
                key: id.clone(),
                side: "desired",
            });
        }
    }
    Ok(())
}
