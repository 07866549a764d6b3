//! Controller configuration
//!
//! Loaded from a JSON file and/or CLI flags by the binary. Every field except
//! the cluster name and VPC id has a default.

use crate::tracking;
use lbsynth_core::{Result, SynthError, Tags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// API limit for resource ARNs per `DescribeTags` call
pub const DEFAULT_TAG_CHUNK_SIZE: usize = 20;

/// Polling interval for eventual-consistency waits
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Overall bound on one eventual-consistency wait
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;

/// Requeue delay suggested when a wait times out
pub const DEFAULT_REQUEUE_DELAY_SECS: u64 = 15;

/// Feature gates that change synthesis behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
    /// Health check protocol, matcher, interval and timeout of TCP/TLS/UDP
    /// target groups can be modified in place
    pub nlb_health_check_advanced_config: bool,

    /// Reconcile load balancer capacity reservations
    pub capacity_reservation: bool,

    /// Tag listeners and listener rules
    pub listener_rules_tagging: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            nlb_health_check_advanced_config: true,
            capacity_reservation: true,
            listener_rules_tagging: true,
        }
    }
}

/// Bounded polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub requeue_delay_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            requeue_delay_secs: DEFAULT_REQUEUE_DELAY_SECS,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Cluster name (value of the cluster tracking tag)
    pub cluster_name: String,

    /// VPC the controller owns resources in
    pub vpc_id: String,

    /// AWS region (SDK default chain when unset)
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub features: FeatureFlags,

    /// ARNs per `DescribeTags` call
    #[serde(default = "default_tag_chunk_size")]
    pub tag_chunk_size: usize,

    /// Tags applied to every resource the controller creates
    #[serde(default)]
    pub default_tags: Tags,

    /// Tag keys managed by someone else; never added or removed
    #[serde(default)]
    pub external_managed_tags: Vec<String>,

    #[serde(default)]
    pub polling: PollSettings,
}

fn default_tag_chunk_size() -> usize {
    DEFAULT_TAG_CHUNK_SIZE
}

impl ControllerConfig {
    /// Create a config with defaults for everything but identity
    pub fn new(cluster_name: impl Into<String>, vpc_id: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            vpc_id: vpc_id.into(),
            region: None,
            features: FeatureFlags::default(),
            tag_chunk_size: DEFAULT_TAG_CHUNK_SIZE,
            default_tags: Tags::new(),
            external_managed_tags: Vec::new(),
            polling: PollSettings::default(),
        }
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| SynthError::config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Set region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set feature flags
    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Set tag fetch chunk size
    pub fn with_tag_chunk_size(mut self, chunk_size: usize) -> Self {
        self.tag_chunk_size = chunk_size;
        self
    }

    /// Add a default tag
    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    /// Add an externally managed tag key
    pub fn with_external_managed_tag(mut self, key: impl Into<String>) -> Self {
        self.external_managed_tags.push(key.into());
        self
    }

    /// Set polling settings
    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    /// Reject configurations the synthesizers cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(SynthError::config("cluster name must not be empty"));
        }
        if self.vpc_id.trim().is_empty() {
            return Err(SynthError::config("VPC id must not be empty"));
        }
        if self.tag_chunk_size == 0 || self.tag_chunk_size > DEFAULT_TAG_CHUNK_SIZE {
            return Err(SynthError::config(format!(
                "tag chunk size must be between 1 and {}, got {}",
                DEFAULT_TAG_CHUNK_SIZE, self.tag_chunk_size
            )));
        }
        if self.polling.interval_secs == 0 || self.polling.timeout_secs < self.polling.interval_secs {
            return Err(SynthError::config(
                "poll interval must be positive and not exceed the poll timeout",
            ));
        }
        for key in self.default_tags.keys() {
            if tracking::is_reserved_tag_key(key) {
                return Err(SynthError::config(format!(
                    "default tag {key} conflicts with a tracking tag"
                )));
            }
            if self.external_managed_tags.contains(key) {
                return Err(SynthError::config(format!(
                    "default tag {key} is also listed as externally managed"
                )));
            }
        }
        Ok(())
    }
}
