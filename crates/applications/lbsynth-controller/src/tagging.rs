//! Tag-based listing of live resources
//!
//! ## Flow
//!
//! 1. List every load balancer (or target group) in the account/region
//! 2. Keep those in the controller's VPC
//! 3. Fetch tags for exactly that set, at most `chunk_size` ARNs per call
//! 4. Keep resources whose tags satisfy ANY of the filters
//!
//! Chunks are fetched concurrently, at most [`MAX_CONCURRENT_TAG_CALLS`] at a
//! time; each chunk returns its own map and the maps are merged in chunk order.

use futures::stream::{self, StreamExt, TryStreamExt};
use lbsynth_core::{LiveLoadBalancer, LiveTargetGroup, LoadBalancingApi, Result, Tags};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// `DescribeTags` calls in flight per listing
pub const MAX_CONCURRENT_TAG_CALLS: usize = 8;

/// Tag key -> allowed values. All keys must match; an empty value list
/// accepts any value for that key.
pub type TagFilter = BTreeMap<String, Vec<String>>;

/// A live resource with its resolved tag set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<R> {
    pub resource: R,
    pub tags: Tags,
}

impl<R> Tagged<R> {
    pub fn new(resource: R, tags: Tags) -> Self {
        Self { resource, tags }
    }
}

/// Whether a tag set satisfies at least one filter. No filters match
/// everything.
pub fn matches_any(tags: &Tags, filters: &[TagFilter]) -> bool {
    filters.is_empty()
        || filters.iter().any(|filter| {
            filter.iter().all(|(key, allowed)| {
                tags.get(key)
                    .is_some_and(|value| allowed.is_empty() || allowed.contains(value))
            })
        })
}

/// Lists live resources scoped to a VPC and filtered by tags
#[derive(Clone)]
pub struct TaggingGateway {
    api: Arc<dyn LoadBalancingApi>,
    vpc_id: String,
    chunk_size: usize,
}

impl TaggingGateway {
    /// Create a gateway for one VPC
    pub fn new(api: Arc<dyn LoadBalancingApi>, vpc_id: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            api,
            vpc_id: vpc_id.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Load balancers in the VPC matching any filter, in API order
    pub async fn list_load_balancers(
        &self,
        filters: &[TagFilter],
    ) -> Result<Vec<Tagged<LiveLoadBalancer>>> {
        let in_vpc: Vec<LiveLoadBalancer> = self
            .api
            .describe_load_balancers()
            .await?
            .into_iter()
            .filter(|lb| lb.vpc_id.as_deref() == Some(self.vpc_id.as_str()))
            .collect();

        self.select(in_vpc, |lb| &lb.arn, filters).await
    }

    /// Target groups in the VPC matching any filter, in API order. Lambda
    /// target groups have no VPC and are selected by tags alone.
    pub async fn list_target_groups(
        &self,
        filters: &[TagFilter],
    ) -> Result<Vec<Tagged<LiveTargetGroup>>> {
        let in_vpc: Vec<LiveTargetGroup> = self
            .api
            .describe_target_groups()
            .await?
            .into_iter()
            .filter(|tg| tg.vpc_id.as_deref().is_none_or(|vpc| vpc == self.vpc_id))
            .collect();

        self.select(in_vpc, |tg| &tg.arn, filters).await
    }

    /// Fetch tags for `arns`, chunked at the per-call limit
    pub async fn fetch_tags(&self, arns: &[String]) -> Result<BTreeMap<String, Tags>> {
        if arns.is_empty() {
            return Ok(BTreeMap::new());
        }

        let chunks: Vec<BTreeMap<String, Tags>> =
            stream::iter(arns.chunks(self.chunk_size).map(|chunk| self.api.describe_tags(chunk)))
                .buffered(MAX_CONCURRENT_TAG_CALLS)
                .try_collect()
                .await?;

        debug!(
            resources = arns.len(),
            calls = chunks.len(),
            "Fetched tags"
        );

        Ok(chunks.into_iter().flatten().collect())
    }

    async fn select<R, F>(
        &self,
        resources: Vec<R>,
        arn_of: F,
        filters: &[TagFilter],
    ) -> Result<Vec<Tagged<R>>>
    where
        F: Fn(&R) -> &String,
    {
        let arns: Vec<String> = resources.iter().map(|r| arn_of(r).clone()).collect();
        let mut tags_by_arn = self.fetch_tags(&arns).await?;

        Ok(resources
            .into_iter()
            .filter_map(|resource| {
                let tags = tags_by_arn.remove(arn_of(&resource)).unwrap_or_default();
                matches_any(&tags, filters).then(|| Tagged::new(resource, tags))
            })
            .collect())
    }
}
