//! Flat key/value reconciliation
//!
//! Tags and attributes are both string maps on a resource ARN. The diff is a
//! pure function; [`reconcile_map`] applies it with at most one upsert call and
//! one remove call, and with no call at all when nothing drifted.

use async_trait::async_trait;
use lbsynth_core::{LoadBalancingApi, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Changes that turn `current` into `desired`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDiff {
    /// Keys to add or overwrite, with their desired values
    pub upsert: BTreeMap<String, String>,
    /// Keys to remove
    pub remove: Vec<String>,
}

impl MapDiff {
    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// Diff two maps, ignoring `ignore` keys on both sides
pub fn diff_maps(
    desired: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    ignore: &[String],
) -> MapDiff {
    let ignored = |key: &String| ignore.contains(key);

    let upsert = desired
        .iter()
        .filter(|(key, value)| !ignored(*key) && current.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let remove = current
        .keys()
        .filter(|key| !ignored(*key) && !desired.contains_key(*key))
        .cloned()
        .collect();

    MapDiff { upsert, remove }
}

/// A flat map stored on a cloud resource
#[async_trait]
pub trait FlatMapStore: Send + Sync {
    /// Label for logs
    fn name(&self) -> &'static str;

    async fn fetch(&self, arn: &str) -> Result<BTreeMap<String, String>>;
    async fn upsert(&self, arn: &str, entries: &BTreeMap<String, String>) -> Result<()>;
    async fn remove(&self, arn: &str, keys: &[String]) -> Result<()>;

    /// Attribute maps have no remove call; absent keys keep their value
    fn supports_removal(&self) -> bool {
        true
    }
}

/// Reconcile the map stored on `arn` to `desired`.
///
/// `current` is fetched when not supplied. Returns whether any call was made.
pub async fn reconcile_map(
    store: &dyn FlatMapStore,
    arn: &str,
    desired: &BTreeMap<String, String>,
    current: Option<&BTreeMap<String, String>>,
    ignore: &[String],
) -> Result<bool> {
    let fetched;
    let current = match current {
        Some(current) => current,
        None => {
            fetched = store.fetch(arn).await?;
            &fetched
        }
    };

    let mut diff = diff_maps(desired, current, ignore);
    if !store.supports_removal() {
        diff.remove.clear();
    }

    if diff.is_empty() {
        debug!(arn = %arn, store = store.name(), "No drift");
        return Ok(false);
    }

    if !diff.upsert.is_empty() {
        info!(
            arn = %arn,
            store = store.name(),
            keys = ?diff.upsert.keys().collect::<Vec<_>>(),
            "Updating entries"
        );
        store.upsert(arn, &diff.upsert).await?;
    }

    if !diff.remove.is_empty() {
        info!(
            arn = %arn,
            store = store.name(),
            keys = ?diff.remove,
            "Removing entries"
        );
        store.remove(arn, &diff.remove).await?;
    }

    Ok(true)
}

/// Resource tags
pub struct TagStore<'a> {
    api: &'a dyn LoadBalancingApi,
}

impl<'a> TagStore<'a> {
    pub fn new(api: &'a dyn LoadBalancingApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl FlatMapStore for TagStore<'_> {
    fn name(&self) -> &'static str {
        "tags"
    }

    async fn fetch(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let mut tags = self.api.describe_tags(&[arn.to_string()]).await?;
        Ok(tags.remove(arn).unwrap_or_default())
    }

    async fn upsert(&self, arn: &str, entries: &BTreeMap<String, String>) -> Result<()> {
        self.api.add_tags(arn, entries).await
    }

    async fn remove(&self, arn: &str, keys: &[String]) -> Result<()> {
        self.api.remove_tags(arn, keys).await
    }
}

/// Load balancer attributes
pub struct LoadBalancerAttributeStore<'a> {
    api: &'a dyn LoadBalancingApi,
}

impl<'a> LoadBalancerAttributeStore<'a> {
    pub fn new(api: &'a dyn LoadBalancingApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl FlatMapStore for LoadBalancerAttributeStore<'_> {
    fn name(&self) -> &'static str {
        "load-balancer-attributes"
    }

    async fn fetch(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        self.api.describe_load_balancer_attributes(arn).await
    }

    async fn upsert(&self, arn: &str, entries: &BTreeMap<String, String>) -> Result<()> {
        self.api.modify_load_balancer_attributes(arn, entries).await
    }

    async fn remove(&self, _arn: &str, _keys: &[String]) -> Result<()> {
        Ok(())
    }

    fn supports_removal(&self) -> bool {
        false
    }
}

/// Target group attributes
pub struct TargetGroupAttributeStore<'a> {
    api: &'a dyn LoadBalancingApi,
}

impl<'a> TargetGroupAttributeStore<'a> {
    pub fn new(api: &'a dyn LoadBalancingApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl FlatMapStore for TargetGroupAttributeStore<'_> {
    fn name(&self) -> &'static str {
        "target-group-attributes"
    }

    async fn fetch(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        self.api.describe_target_group_attributes(arn).await
    }

    async fn upsert(&self, arn: &str, entries: &BTreeMap<String, String>) -> Result<()> {
        self.api.modify_target_group_attributes(arn, entries).await
    }

    async fn remove(&self, _arn: &str, _keys: &[String]) -> Result<()> {
        Ok(())
    }

    fn supports_removal(&self) -> bool {
        false
    }
}
