//! Pearl routing.
//!
//! Given a heartbeat from a friend, the router selects which of the owner's
//! shareable pearls are worth offering: a tag prefilter against the
//! friend's declared interests, then a trust-threshold filter in each
//! pearl's primary domain. Routing volume per friend is capped per day.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::debug;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::model::OVERALL_DOMAIN;
use crate::storage::Storage;
use crate::trust::TrustService;

/// Routings allowed per (owner → friend) in a rolling 24 hours.
pub const ROUTING_DAILY_CAP: u64 = 3;

/// One pearl that survived both filter stages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingCandidate {
    pub pearl_id: String,
    pub domain_tags: Vec<String>,
    pub luster: f64,
}

/// Context attached to a Layer-1 routing item.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingContext {
    pub owner_id: String,
    pub friend_id: String,
    /// Interests the friend declared in the triggering heartbeat.
    pub interests: Vec<String>,
    pub candidates: Vec<RoutingCandidate>,
}

/// Two-stage candidate filter plus the per-friend frequency cap.
pub struct PearlRouter {
    storage: Storage,
    trust: Arc<TrustService>,
    clock: SharedClock,
}

impl PearlRouter {
    pub fn new(storage: Storage, trust: Arc<TrustService>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, trust, clock })
    }

    /// Build the routing context for a heartbeat from `friend` to `owner`.
    ///
    /// Returns `None` when no candidate survives: nothing shareable, no tag
    /// overlap, or every overlapping pearl gated behind a trust threshold
    /// the pair does not meet.
    pub async fn build_context(
        &self,
        owner: &str,
        friend: &str,
        interests: &[String],
    ) -> Result<Option<RoutingContext>> {
        if interests.is_empty() {
            return Ok(None);
        }
        let shareable = self.storage.pearls.list_shareable(owner).await?;
        let mut candidates = Vec::new();
        for pearl in shareable {
            if self.storage.pearls.was_shared_with(&pearl.id, friend).await? {
                continue;
            }
            // Stage 1: tag prefilter.
            if !pearl.domain_tags.iter().any(|tag| interests.iter().any(|i| i == tag)) {
                continue;
            }
            // Stage 2: trust threshold in the primary domain.
            if let Some(threshold) =
                pearl.share_conditions.as_ref().and_then(|c| c.trust_threshold)
            {
                let domain = pearl.domain_tags.first().map(String::as_str).unwrap_or(OVERALL_DOMAIN);
                let composite = self.trust.composite_or_default(owner, friend, domain).await?;
                if composite < threshold {
                    continue;
                }
            }
            candidates.push(RoutingCandidate {
                pearl_id: pearl.id.clone(),
                domain_tags: pearl.domain_tags.clone(),
                luster: pearl.luster,
            });
        }
        if candidates.is_empty() {
            return Ok(None);
        }
        debug!(owner, friend, count = candidates.len(), "routing candidates selected");
        Ok(Some(RoutingContext {
            owner_id: owner.to_string(),
            friend_id: friend.to_string(),
            interests: interests.to_vec(),
            candidates,
        }))
    }

    /// Whether the 24-hour routing cap for (owner → friend) is exhausted.
    pub async fn frequency_cap_hit(&self, owner: &str, friend: &str) -> Result<bool> {
        let since = self.clock.now() - Duration::hours(24);
        let dispatched =
            self.storage.executions.count_routing_dispatches(owner, friend, since).await?;
        Ok(dispatched >= ROUTING_DAILY_CAP)
    }
}
