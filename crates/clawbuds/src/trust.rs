//! Five-dimensional trust model.
//!
//! Per (from, to, domain) the service tracks Q (agent-observed
//! interactions), H (human endorsement, unset until a human weighs in),
//! N (network position) and W (witness chain), composed into a clamped
//! composite. The composite rule reweights when H is unset so that an
//! all-`v` record composes to exactly `v`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::bus::EventHandler;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventPayload;
use crate::model::{DunbarLayer, TrustScore, OVERALL_DOMAIN};
use crate::storage::Storage;

/// Fixed composition weights; H carries the largest share.
pub const WEIGHT_Q: f64 = 0.25;
pub const WEIGHT_H: f64 = 0.40;
pub const WEIGHT_N: f64 = 0.20;
pub const WEIGHT_W: f64 = 0.15;

/// Witness contributions are dampened below direct observation.
const WITNESS_DAMPENING: f64 = 0.8;

/// Default composite assumed for pairs with no stored record.
const DEFAULT_COMPOSITE: f64 = 0.5;

/// Compose Q/H/N/W into the clamped composite.
///
/// With H set, the four fixed weights apply directly; with H unset the
/// remaining weights are renormalized over {Q, N, W}.
pub fn composite_score(q: f64, h: Option<f64>, n: f64, w: f64) -> f64 {
    let raw = match h {
        Some(h) => WEIGHT_Q * q + WEIGHT_H * h + WEIGHT_N * n + WEIGHT_W * w,
        None => {
            (WEIGHT_Q * q + WEIGHT_N * n + WEIGHT_W * w) / (WEIGHT_Q + WEIGHT_N + WEIGHT_W)
        }
    };
    raw.clamp(0.0, 1.0)
}

/// Network-position score contributed by a Dunbar layer.
pub fn layer_score(layer: DunbarLayer) -> f64 {
    match layer {
        DunbarLayer::Core => 1.0,
        DunbarLayer::Sympathy => 0.75,
        DunbarLayer::Active => 0.5,
        DunbarLayer::Casual => 0.25,
    }
}

/// Domain signals observed by the agent, each mapping to a fixed Q delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSignal {
    HelpfulReply,
    EndorsedPearl,
    AcceptedShare,
    GroomReply,
    Ignored,
    Reported,
}

impl TrustSignal {
    pub fn delta(self) -> f64 {
        match self {
            TrustSignal::HelpfulReply => 0.05,
            TrustSignal::EndorsedPearl => 0.04,
            TrustSignal::AcceptedShare => 0.03,
            TrustSignal::GroomReply => 0.02,
            TrustSignal::Ignored => -0.02,
            TrustSignal::Reported => -0.15,
        }
    }
}

/// Trust score maintenance and lookups.
pub struct TrustService {
    storage: Storage,
    clock: SharedClock,
    monthly_decay: f64,
}

impl TrustService {
    pub fn new(storage: Storage, clock: SharedClock, config: &Config) -> Arc<Self> {
        Arc::new(Self { storage, clock, monthly_decay: config.trust_monthly_decay })
    }

    fn default_row(&self, from: &str, to: &str, domain: &str) -> TrustScore {
        let q = 0.5;
        let n = 0.5;
        let w = 0.0;
        TrustScore {
            from_claw: from.to_string(),
            to_claw: to.to_string(),
            domain: domain.to_string(),
            q,
            h: None,
            n,
            w,
            composite: composite_score(q, None, n, w),
            updated_at: self.clock.now(),
        }
    }

    /// Trust in domain `domain`, falling back to the `_overall` row when no
    /// domain-specific record exists.
    pub async fn get(&self, from: &str, to: &str, domain: &str) -> Result<Option<TrustScore>> {
        if let Some(score) = self.storage.trust.get(from, to, domain).await? {
            return Ok(Some(score));
        }
        if domain != OVERALL_DOMAIN {
            return self.storage.trust.get(from, to, OVERALL_DOMAIN).await;
        }
        Ok(None)
    }

    /// Composite trust with the default for unknown pairs.
    pub async fn composite_or_default(&self, from: &str, to: &str, domain: &str) -> Result<f64> {
        Ok(self.get(from, to, domain).await?.map(|s| s.composite).unwrap_or(DEFAULT_COMPOSITE))
    }

    async fn load_or_default(&self, from: &str, to: &str, domain: &str) -> Result<TrustScore> {
        Ok(self
            .storage
            .trust
            .get(from, to, domain)
            .await?
            .unwrap_or_else(|| self.default_row(from, to, domain)))
    }

    /// Apply a domain signal: the fixed delta lands on both the `_overall`
    /// row and the domain row, creating missing rows at defaults, then the
    /// composite of each touched row is recomputed.
    pub async fn record_signal(
        &self,
        from: &str,
        to: &str,
        domain: &str,
        signal: TrustSignal,
    ) -> Result<()> {
        let delta = signal.delta();
        let mut domains = vec![OVERALL_DOMAIN.to_string()];
        if domain != OVERALL_DOMAIN {
            domains.push(domain.to_string());
        }
        for d in domains {
            let mut row = self.load_or_default(from, to, &d).await?;
            row.q = (row.q + delta).clamp(0.0, 1.0);
            row.composite = composite_score(row.q, row.h, row.n, row.w);
            row.updated_at = self.clock.now();
            self.storage.trust.upsert(row).await?;
        }
        debug!(from, to, domain, ?signal, "trust signal applied");
        Ok(())
    }

    /// Replace the human endorsement dimension and recompute the composite.
    pub async fn endorse(&self, from: &str, to: &str, domain: &str, h: f64) -> Result<TrustScore> {
        let mut row = self.load_or_default(from, to, domain).await?;
        row.h = Some(h.clamp(0.0, 1.0));
        row.composite = composite_score(row.q, row.h, row.n, row.w);
        row.updated_at = self.clock.now();
        self.storage.trust.upsert(row.clone()).await?;
        Ok(row)
    }

    /// Recompute N for every domain row of the directed pair after a Dunbar
    /// layer change. The mutual-friend term defaults to 0.
    pub async fn recompute_network(
        &self,
        from: &str,
        to: &str,
        layer: DunbarLayer,
        strength: f64,
    ) -> Result<()> {
        let mutual_score = 0.0;
        let n = (layer_score(layer) + strength.clamp(0.0, 1.0) + mutual_score) / 3.0;

        let mut rows = self.storage.trust.list_pair(from, to).await?;
        if rows.is_empty() {
            rows.push(self.default_row(from, to, OVERALL_DOMAIN));
        }
        for mut row in rows {
            row.n = n;
            row.composite = composite_score(row.q, row.h, row.n, row.w);
            row.updated_at = self.clock.now();
            self.storage.trust.upsert(row).await?;
        }
        Ok(())
    }

    /// Recompute W for one domain row from the witness chain over mutual
    /// friends, then the composite.
    pub async fn recompute_witness(&self, from: &str, to: &str, domain: &str) -> Result<()> {
        let mutuals = self.storage.friendships.mutual_friends(from, to).await?;
        let w = if mutuals.is_empty() {
            0.0
        } else {
            let mut sum = 0.0;
            for witness in &mutuals {
                let to_witness =
                    self.composite_or_default(from, witness, OVERALL_DOMAIN).await?;
                let witness_to_target = self.composite_or_default(witness, to, domain).await?;
                sum += to_witness * witness_to_target * WITNESS_DAMPENING;
            }
            sum / mutuals.len() as f64
        };

        let mut row = self.load_or_default(from, to, domain).await?;
        row.w = w.clamp(0.0, 1.0);
        row.composite = composite_score(row.q, row.h, row.n, row.w);
        row.updated_at = self.clock.now();
        self.storage.trust.upsert(row).await?;
        Ok(())
    }

    /// Monthly maintenance: every Q decays multiplicatively; H never decays.
    pub async fn monthly_decay(&self) -> Result<u64> {
        self.storage.trust.decay_q(self.monthly_decay, self.clock.now()).await
    }

    /// Drop all trust state for a dissolved pair.
    pub async fn on_friend_removed(&self, a: &str, b: &str) -> Result<()> {
        self.storage.trust.delete_pair(a, b).await
    }

    /// Direct upsert of all four dimensions, used by import tooling and
    /// tests. The stored composite is always recomputed here, never taken
    /// from the caller.
    pub async fn upsert_dimensions(
        &self,
        from: &str,
        to: &str,
        domain: &str,
        q: f64,
        h: Option<f64>,
        n: f64,
        w: f64,
    ) -> Result<TrustScore> {
        let row = TrustScore {
            from_claw: from.to_string(),
            to_claw: to.to_string(),
            domain: domain.to_string(),
            q: q.clamp(0.0, 1.0),
            h: h.map(|v| v.clamp(0.0, 1.0)),
            n: n.clamp(0.0, 1.0),
            w: w.clamp(0.0, 1.0),
            composite: composite_score(q, h, n, w),
            updated_at: self.clock.now(),
        };
        self.storage.trust.upsert(row.clone()).await?;
        Ok(row)
    }

    /// Cutoff helper shared by periodic jobs.
    pub fn month_ago(&self) -> DateTime<Utc> {
        self.clock.now() - Duration::days(30)
    }
}

/// Bus subscriber keeping N and pair state current.
#[async_trait]
impl EventHandler for TrustService {
    fn name(&self) -> &'static str {
        "trust"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()> {
        match event {
            EventPayload::RelationshipLayerChanged { from_claw, to_claw, new_layer, strength, .. } => {
                self.recompute_network(from_claw, to_claw, *new_layer, *strength).await
            }
            EventPayload::FriendRemoved { claw_id, friend_id } => {
                self.on_friend_removed(claw_id, friend_id).await
            }
            EventPayload::FriendAccepted { requester_id, accepter_id } => {
                // A fresh edge changes the witness chains through it, in
                // both directions.
                self.recompute_witness(requester_id, accepter_id, OVERALL_DOMAIN).await?;
                self.recompute_witness(accepter_id, requester_id, OVERALL_DOMAIN).await
            }
            EventPayload::PearlEndorsed { owner_id, endorser_id, .. } => {
                // The owner observed a concrete positive interaction from
                // the endorser.
                self.record_signal(owner_id, endorser_id, OVERALL_DOMAIN, TrustSignal::EndorsedPearl)
                    .await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        assert!((WEIGHT_Q + WEIGHT_H + WEIGHT_N + WEIGHT_W - 1.0).abs() < 1e-12);
    }

    #[test]
    fn composite_with_h_matches_weighted_sum() {
        let c = composite_score(0.6, Some(0.8), 0.5, 0.2);
        let expected = 0.25 * 0.6 + 0.40 * 0.8 + 0.20 * 0.5 + 0.15 * 0.2;
        assert!((c - expected).abs() < 1e-12);
        assert!((c - 0.60).abs() < 1e-12);
    }

    #[test]
    fn composite_without_h_is_identity_on_uniform_scores() {
        for v in [0.0, 0.25, 0.5, 0.9, 1.0] {
            let c = composite_score(v, None, v, v);
            assert!((c - v).abs() < 1e-12, "v={v} composite={c}");
        }
    }

    #[test]
    fn composite_is_clamped() {
        assert!(composite_score(1.0, Some(1.0), 1.0, 1.0) <= 1.0);
        assert!(composite_score(0.0, Some(0.0), 0.0, 0.0) >= 0.0);
    }

    #[test]
    fn layer_scores_are_ordered() {
        assert!(layer_score(DunbarLayer::Core) > layer_score(DunbarLayer::Sympathy));
        assert!(layer_score(DunbarLayer::Sympathy) > layer_score(DunbarLayer::Active));
        assert!(layer_score(DunbarLayer::Active) > layer_score(DunbarLayer::Casual));
    }

    #[test]
    fn negative_signals_push_q_down() {
        assert!(TrustSignal::Reported.delta() < 0.0);
        assert!(TrustSignal::HelpfulReply.delta() > 0.0);
    }
}
