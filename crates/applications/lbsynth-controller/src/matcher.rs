//! Pairing desired resources with live resources
//!
//! Two identity strategies:
//!
//! - **Tag-based**: the live resource's tracking tag carries the desired
//!   resource's logical id. A tracked live resource without the tag is an
//!   identity violation and fails the whole match.
//! - **Structural**: a key both sides share (listener port, rule priority).
//!
//! Every desired and every live resource lands in exactly one bucket. Buckets
//! are sorted by key.

use lbsynth_core::{ResourceKind, Result, SynthError, Tags};
use std::collections::BTreeMap;
use std::fmt::Display;
use tracing::warn;

/// Partition of desired and live resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult<D, L> {
    pub matched: Vec<(D, L)>,
    pub desired_only: Vec<D>,
    pub live_only: Vec<L>,
}

impl<D, L> Default for MatchResult<D, L> {
    fn default() -> Self {
        Self {
            matched: Vec::new(),
            desired_only: Vec::new(),
            live_only: Vec::new(),
        }
    }
}

impl<D, L> MatchResult<D, L> {
    /// Nothing to create or delete
    pub fn is_converged(&self) -> bool {
        self.desired_only.is_empty() && self.live_only.is_empty()
    }
}

/// Match by tracking tag.
///
/// Duplicate desired ids are rejected. When several live resources carry the
/// same id, the first one `compatible` with the desired resource is matched
/// (falling back to the first in list order) and the rest are live-only.
#[allow(clippy::too_many_arguments)]
pub fn match_by_tag<D, L>(
    kind: ResourceKind,
    desired: Vec<D>,
    desired_id: impl Fn(&D) -> &str,
    live: Vec<L>,
    tag_key: &str,
    live_tags: impl Fn(&L) -> &Tags,
    live_arn: impl Fn(&L) -> &str,
    compatible: impl Fn(&D, &L) -> bool,
) -> Result<MatchResult<D, L>> {
    let mut live_by_id: BTreeMap<String, Vec<L>> = BTreeMap::new();

    for resource in live {
        let Some(id) = live_tags(&resource).get(tag_key).cloned() else {
            return Err(SynthError::IdentityViolation {
                kind: kind.to_string(),
                arn: live_arn(&resource).to_string(),
                tag_key: tag_key.to_string(),
            });
        };
        live_by_id.entry(id).or_default().push(resource);
    }

    let desired_by_id = index_unique(kind, desired, |d| desired_id(d).to_string(), "desired")?;
    let mut result = MatchResult::default();

    for (id, d) in desired_by_id {
        let Some(mut candidates) = live_by_id.remove(&id) else {
            result.desired_only.push(d);
            continue;
        };

        let chosen = candidates
            .iter()
            .position(|l| compatible(&d, l))
            .unwrap_or(0);
        let l = candidates.remove(chosen);

        for stale in &candidates {
            warn!(
                kind = %kind,
                resource_id = %id,
                arn = %live_arn(stale),
                kept = %live_arn(&l),
                "Duplicate tracking tag, treating extra resource as stale"
            );
        }
        result.matched.push((d, l));
        live_by_id.insert(id, candidates);
    }

    result.live_only = live_by_id.into_values().flatten().collect();
    Ok(result)
}

/// Match by a structural key. Duplicate keys on either side are rejected.
pub fn match_by_key<D, L, K>(
    kind: ResourceKind,
    desired: Vec<D>,
    desired_key: impl Fn(&D) -> K,
    live: Vec<L>,
    live_key: impl Fn(&L) -> K,
) -> Result<MatchResult<D, L>>
where
    K: Ord + Display,
{
    let desired_by_key = index_unique(kind, desired, desired_key, "desired")?;
    let live_by_key = index_unique(kind, live, live_key, "live")?;
    Ok(pair(desired_by_key, live_by_key))
}

fn index_unique<T, K: Ord + Display>(
    kind: ResourceKind,
    items: Vec<T>,
    key_of: impl Fn(&T) -> K,
    side: &'static str,
) -> Result<BTreeMap<K, T>> {
    let mut indexed = BTreeMap::new();
    for item in items {
        let key = key_of(&item);
        if indexed.contains_key(&key) {
            return Err(SynthError::DuplicateKey {
                kind: kind.to_string(),
                key: key.to_string(),
                side,
            });
        }
        indexed.insert(key, item);
    }
    Ok(indexed)
}

fn pair<K: Ord, D, L>(desired: BTreeMap<K, D>, mut live: BTreeMap<K, L>) -> MatchResult<D, L> {
    let mut result = MatchResult::default();

    for (key, d) in desired {
        match live.remove(&key) {
            Some(l) => result.matched.push((d, l)),
            None => result.desired_only.push(d),
        }
    }
    result.live_only = live.into_values().collect();

    result
}
