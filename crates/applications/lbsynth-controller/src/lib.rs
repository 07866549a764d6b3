//! # lbsynth controller
//!
//! Drives live AWS Elastic Load Balancing resources toward a desired stack.
//!
//! ## Architecture
//!
//! ```text
//! Stack (desired)             AWS ELBv2 (live)
//! ├── Load balancers   ───┐
//! ├── Target groups       │   TaggingGateway ── DescribeTags (chunked)
//! ├── Listeners           ├── matcher ── replacement ── diff
//! ├── Listener rules      │
//! └── TG bindings      ───┘   BindingApi (cluster objects)
//! ```
//!
//! Ownership is carried entirely by tags: every resource the controller
//! creates is stamped with the cluster, stack and resource tracking tags, and
//! every pass rediscovers its resources by those tags. There is no local
//! state between passes.
//!
//! See [`deployer`] for the pass order and [`synth`] for the per-kind
//! delete/create/update phases.

#![warn(clippy::all)]

pub mod aws;
pub mod capacity;
pub mod config;
pub mod deployer;
pub mod diff;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod poll;
pub mod replacement;
pub mod synth;
pub mod tagging;
pub mod targets;
pub mod tracking;

#[cfg(test)]
mod testing;

// ============================================================================
// Public exports
// ============================================================================

// Configuration
pub use config::{ControllerConfig, FeatureFlags, PollSettings, DEFAULT_TAG_CHUNK_SIZE};

// Desired model
pub use model::{ModelResource, Stack, StackId};

// Stack synthesis
pub use deployer::{DeployReport, InventoryEntry, StackDeployer};
pub use synth::{DeferredDelete, KindReport};

// Cloud bindings
pub use aws::{create_elb_client, AwsLoadBalancingApi};

// Target registration
pub use targets::TargetManager;

// Metrics
pub use metrics::{init_prometheus, render_prometheus, ResourceMetrics, MANAGED_RESOURCE_GAUGE};

// Core types
pub use lbsynth_core::{CloudError, Result, SynthError};
