//! Managed resource metrics
//!
//! One gauge, `lbsynth_managed_resource`, per cloud resource the controller
//! believes it owns: 1 while the resource exists, 0 once it has been deleted.
//! The registry is constructed once and injected into every pass; the
//! Prometheus recorder behind the `metrics` facade is installed by the binary.

use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, error, info};

use crate::model::StackId;

/// Gauge name
pub const MANAGED_RESOURCE_GAUGE: &str = "lbsynth_managed_resource";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Returns `false` when already installed or when installation failed; the
/// controller keeps running without an exporter in that case.
pub fn init_prometheus() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        debug!("Prometheus recorder already installed");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                return false;
            }
            info!("Prometheus recorder installed");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render metrics in Prometheus text format, if the recorder is installed
pub fn render_prometheus() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

/// Label set of one gauge series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceKey {
    pub resource_name: String,
    pub resource_namespace: String,
    pub cloud_resource_name: String,
    pub cloud_resource_type: String,
}

impl ResourceKey {
    pub fn new(stack: &StackId, cloud_resource_name: &str, cloud_resource_type: &str) -> Self {
        Self {
            resource_name: stack.name.clone(),
            resource_namespace: stack.namespace.clone().unwrap_or_default(),
            cloud_resource_name: cloud_resource_name.to_string(),
            cloud_resource_type: cloud_resource_type.to_string(),
        }
    }
}

/// Thread-safe managed resource registry, shared by concurrent passes
#[derive(Debug, Clone, Default)]
pub struct ResourceMetrics {
    values: Arc<Mutex<BTreeMap<ResourceKey, f64>>>,
}

impl ResourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cloud resource exists
    pub fn mark_present(&self, stack: &StackId, cloud_resource_name: &str, cloud_resource_type: &str) {
        self.set(ResourceKey::new(stack, cloud_resource_name, cloud_resource_type), 1.0);
    }

    /// The cloud resource has been deleted
    pub fn mark_deleted(&self, stack: &StackId, cloud_resource_name: &str, cloud_resource_type: &str) {
        self.set(ResourceKey::new(stack, cloud_resource_name, cloud_resource_type), 0.0);
    }

    /// Last value recorded for a series
    pub fn value(&self, key: &ResourceKey) -> Option<f64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn set(&self, key: ResourceKey, value: f64) {
        gauge!(
            MANAGED_RESOURCE_GAUGE,
            "resource_name" => key.resource_name.clone(),
            "resource_namespace" => key.resource_namespace.clone(),
            "cloud_resource_name" => key.cloud_resource_name.clone(),
            "cloud_resource_type" => key.cloud_resource_type.clone()
        )
        .set(value);

        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }
}
