//! Pearl lifecycle.
//!
//! A pearl is an owner-scoped cognitive artifact with domain tags and a
//! luster score: a trust-weighted aggregate of endorsements with a small
//! citation boost, always within [0.1, 1.0].

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::events::EventPayload;
use crate::model::{
    Endorsement, Pearl, PearlOrigin, ShareConditions, Shareability, OVERALL_DOMAIN,
};
use crate::routing::RoutingContext;
use crate::storage::Storage;
use crate::trust::TrustService;

/// Weight of the implicit baseline vote of 0.5.
const BASELINE_WEIGHT: f64 = 1.0;
/// Luster never falls below this floor.
const LUSTER_FLOOR: f64 = 0.1;
/// Citation boost per five citations, capped.
const CITATION_BOOST_STEP: f64 = 0.04;
const CITATION_BOOST_CAP: f64 = 0.20;

/// Trust-weighted luster over (score, weight) endorsement pairs.
///
/// A baseline vote of strength [`BASELINE_WEIGHT`] at 0.5 anchors sparse
/// endorsement sets; with no endorsements the result is 0.5 plus the
/// citation boost, clamped to [0.1, 1.0].
pub fn luster(weighted_scores: &[(f64, f64)], citations: u32) -> f64 {
    let mut weighted_sum = BASELINE_WEIGHT * 0.5;
    let mut trust_sum = BASELINE_WEIGHT;
    for (score, weight) in weighted_scores {
        weighted_sum += score * weight;
        trust_sum += weight;
    }
    let raw = weighted_sum / trust_sum;
    let boost = (f64::from(citations) / 5.0 * CITATION_BOOST_STEP).min(CITATION_BOOST_CAP);
    (raw + boost).clamp(LUSTER_FLOOR, 1.0)
}

/// Pearl creation, endorsement, citation and sharing.
pub struct PearlService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
    trust: Arc<TrustService>,
}

impl PearlService {
    pub fn new(
        storage: Storage,
        bus: Arc<EventBus>,
        clock: SharedClock,
        trust: Arc<TrustService>,
    ) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock, trust })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        owner: &str,
        kind: &str,
        trigger: &str,
        domain_tags: Vec<String>,
        body: serde_json::Value,
        shareability: Shareability,
        share_conditions: Option<ShareConditions>,
        origin: PearlOrigin,
    ) -> Result<Pearl> {
        let now = self.clock.now();
        let pearl = Pearl {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            kind: kind.to_string(),
            trigger: trigger.to_string(),
            domain_tags,
            body,
            luster: luster(&[], 0),
            shareability,
            share_conditions,
            origin,
            citations: 0,
            created_at: now,
            updated_at: now,
        };
        self.storage.pearls.insert(pearl.clone()).await?;
        self.bus.emit(EventPayload::PearlCreated { pearl: pearl.clone() });
        Ok(pearl)
    }

    pub async fn find(&self, id: &str) -> Result<Pearl> {
        self.storage
            .pearls
            .find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("pearl {id}")))
    }

    pub async fn list_by_owner(&self, owner: &str) -> Result<Vec<Pearl>> {
        self.storage.pearls.list_by_owner(owner).await
    }

    /// Upsert an endorsement and recompute the pearl's luster.
    ///
    /// The owner may not endorse their own pearl.
    pub async fn endorse(
        &self,
        endorser: &str,
        pearl_id: &str,
        score: f64,
        comment: Option<String>,
    ) -> Result<Pearl> {
        let pearl = self.find(pearl_id).await?;
        if pearl.owner_id == endorser {
            return Err(CoreError::SelfEndorse);
        }
        self.storage
            .pearls
            .upsert_endorsement(Endorsement {
                pearl_id: pearl_id.to_string(),
                endorser_id: endorser.to_string(),
                score: score.clamp(0.0, 1.0),
                comment,
                created_at: self.clock.now(),
            })
            .await?;
        let pearl = self.recompute_luster(pearl_id).await?;
        self.bus.emit(EventPayload::PearlEndorsed {
            pearl_id: pearl_id.to_string(),
            owner_id: pearl.owner_id.clone(),
            endorser_id: endorser.to_string(),
            score,
        });
        Ok(pearl)
    }

    /// Record a citation and recompute luster.
    pub async fn cite(&self, pearl_id: &str) -> Result<Pearl> {
        self.storage.pearls.record_citation(pearl_id).await?;
        self.recompute_luster(pearl_id).await
    }

    /// Recompute and persist luster from the current endorsement set.
    ///
    /// Endorsements are weighted by the owner's `_overall` composite trust
    /// in the endorser; unknown endorsers fall back to unit weight, which
    /// degenerates to the arithmetic mean with the 0.5 baseline.
    pub async fn recompute_luster(&self, pearl_id: &str) -> Result<Pearl> {
        let mut pearl = self.find(pearl_id).await?;
        let endorsements = self.storage.pearls.list_endorsements(pearl_id).await?;
        let mut weighted = Vec::with_capacity(endorsements.len());
        for endorsement in &endorsements {
            let weight = match self
                .trust
                .get(&pearl.owner_id, &endorsement.endorser_id, OVERALL_DOMAIN)
                .await
            {
                Ok(Some(score)) => score.composite,
                _ => 1.0,
            };
            weighted.push((endorsement.score, weight));
        }
        pearl.luster = luster(&weighted, pearl.citations);
        pearl.updated_at = self.clock.now();
        self.storage.pearls.update(pearl.clone()).await?;
        Ok(pearl)
    }

    /// Share a pearl with a friend.
    ///
    /// Manual shares (no routing context) skip the domain-match gate.
    /// Routed shares fail with `DOMAIN_MISMATCH` when the pearl requires a
    /// domain match and its tags do not intersect the recipient's declared
    /// interests.
    pub async fn share(
        &self,
        caller: &str,
        pearl_id: &str,
        to_claw: &str,
        context: Option<&RoutingContext>,
    ) -> Result<()> {
        let pearl = self.find(pearl_id).await?;
        if pearl.owner_id != caller {
            return Err(CoreError::Forbidden("only the owner may share a pearl".into()));
        }
        if pearl.shareability == Shareability::Private {
            return Err(CoreError::Private(format!("pearl {pearl_id}")));
        }
        if !self.storage.friendships.are_friends(caller, to_claw).await? {
            return Err(CoreError::NotFriends(format!("{to_claw} is not an accepted friend")));
        }
        if let Some(context) = context {
            let wants_match = pearl
                .share_conditions
                .as_ref()
                .and_then(|c| c.domain_match)
                .unwrap_or(false);
            if wants_match {
                let intersects = pearl
                    .domain_tags
                    .iter()
                    .any(|tag| context.interests.iter().any(|i| i == tag));
                if !intersects {
                    return Err(CoreError::DomainMismatch(format!(
                        "pearl {pearl_id} tags do not overlap recipient interests"
                    )));
                }
            }
        }
        self.storage.pearls.record_share(pearl_id, to_claw, self.clock.now()).await?;
        debug!(pearl = pearl_id, to = to_claw, routed = context.is_some(), "pearl shared");
        self.bus.emit(EventPayload::PearlShared {
            pearl_id: pearl_id.to_string(),
            owner_id: pearl.owner_id.clone(),
            to_claw: to_claw.to_string(),
            domain_tags: pearl.domain_tags.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endorsements_yield_baseline() {
        assert!((luster(&[], 0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn citation_boost_is_capped() {
        assert!((luster(&[], 5) - 0.54).abs() < 1e-12);
        assert!((luster(&[], 1_000) - 0.70).abs() < 1e-12);
    }

    #[test]
    fn high_trust_endorsements_dominate() {
        // One strongly trusted positive endorsement pulls luster above the
        // baseline, a distrusted one barely moves it.
        let trusted = luster(&[(1.0, 0.9)], 0);
        let distrusted = luster(&[(1.0, 0.05)], 0);
        assert!(trusted > distrusted);
        assert!(trusted > 0.7);
        assert!(distrusted < 0.6);
    }

    #[test]
    fn luster_stays_in_bounds() {
        assert!(luster(&[(0.0, 1.0); 50], 0) >= 0.1);
        assert!(luster(&[(1.0, 1.0); 50], 100) <= 1.0);
    }

    #[test]
    fn unit_weights_degenerate_to_mean_with_baseline() {
        let value = luster(&[(0.8, 1.0), (0.6, 1.0)], 0);
        let expected = (0.5 + 0.8 + 0.6) / 3.0;
        assert!((value - expected).abs() < 1e-12);
    }
}
