//! Relationship strength and Dunbar layers.
//!
//! Each directed edge carries an energy scalar boosted by interactions and
//! decaying exponentially while idle, with a half-life of about a week by
//! default. Strength bands project onto the four Dunbar layers; whenever a
//! boost or a decay application crosses a band boundary the service emits
//! `relationship.layer_changed` exactly once, synchronously with the
//! strength update.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bus::{EventBus, EventHandler};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventPayload;
use crate::model::{DunbarLayer, RelationshipStrength};
use crate::storage::Storage;

/// Pure strength mathematics.
pub mod dunbar {
    use super::DunbarLayer;

    /// Exponential decay of `strength` after `elapsed_secs` of idleness.
    ///
    /// λ is chosen so the value halves every `half_life_days`. Reproducible
    /// to the bit for identical inputs.
    pub fn decay(strength: f64, elapsed_secs: f64, half_life_days: f64) -> f64 {
        if elapsed_secs <= 0.0 || half_life_days <= 0.0 {
            return strength.clamp(0.0, 1.0);
        }
        let lambda = std::f64::consts::LN_2 / (half_life_days * 86_400.0);
        (strength * (-lambda * elapsed_secs).exp()).clamp(0.0, 1.0)
    }

    /// Band projection with inclusive upper bounds.
    pub fn layer_for(strength: f64) -> DunbarLayer {
        if strength >= 0.75 {
            DunbarLayer::Core
        } else if strength >= 0.50 {
            DunbarLayer::Sympathy
        } else if strength >= 0.25 {
            DunbarLayer::Active
        } else {
            DunbarLayer::Casual
        }
    }
}

/// Interaction kinds and their strength deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Message,
    Reaction,
    Heartbeat,
    PearlShare,
    ThreadContribution,
    Groom,
}

impl InteractionKind {
    pub fn boost_delta(self) -> f64 {
        match self {
            InteractionKind::Message => 0.05,
            InteractionKind::Reaction => 0.02,
            InteractionKind::Heartbeat => 0.01,
            InteractionKind::PearlShare => 0.08,
            InteractionKind::ThreadContribution => 0.06,
            InteractionKind::Groom => 0.04,
        }
    }
}

/// Strength seeded on a freshly accepted friendship.
const INITIAL_STRENGTH: f64 = 0.5;

/// Strength decay, boosts and layer projection.
pub struct RelationshipService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
    half_life_days: f64,
}

impl RelationshipService {
    pub fn new(
        storage: Storage,
        bus: Arc<EventBus>,
        clock: SharedClock,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock, half_life_days: config.relationship_halflife_days })
    }

    fn decayed(&self, row: &RelationshipStrength, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - row.last_boost_at).num_milliseconds() as f64 / 1000.0;
        dunbar::decay(row.strength, elapsed, self.half_life_days)
    }

    /// Current strength with lazy decay applied.
    ///
    /// When the decay since the last persisted update crosses a band, the
    /// decayed value is persisted and a layer-change event fires; otherwise
    /// the stored row is left untouched and the caller sees the computed
    /// value.
    pub async fn current(&self, from: &str, to: &str) -> Result<Option<RelationshipStrength>> {
        let Some(row) = self.storage.strengths.get(from, to).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        let strength = self.decayed(&row, now);
        let layer = dunbar::layer_for(strength);
        if layer != row.layer {
            let updated = RelationshipStrength {
                strength,
                last_boost_at: now,
                layer,
                ..row.clone()
            };
            self.storage.strengths.upsert(updated.clone()).await?;
            self.emit_layer_change(&row, &updated);
            return Ok(Some(updated));
        }
        Ok(Some(RelationshipStrength { strength, ..row }))
    }

    /// Apply an interaction boost to the directed edge.
    ///
    /// Decay runs up to now first, then the kind's delta lands, clamped to
    /// [0, 1]. Edges only exist between accepted friends; boosts on unknown
    /// pairs are ignored.
    pub async fn boost(&self, from: &str, to: &str, kind: InteractionKind) -> Result<()> {
        let Some(row) = self.storage.strengths.get(from, to).await? else {
            debug!(from, to, "boost on unknown edge ignored");
            return Ok(());
        };
        let now = self.clock.now();
        let strength = (self.decayed(&row, now) + kind.boost_delta()).clamp(0.0, 1.0);
        let updated = RelationshipStrength {
            from_claw: row.from_claw.clone(),
            to_claw: row.to_claw.clone(),
            strength,
            last_boost_at: now,
            layer: dunbar::layer_for(strength),
        };
        self.storage.strengths.upsert(updated.clone()).await?;
        if updated.layer != row.layer {
            self.emit_layer_change(&row, &updated);
        }
        Ok(())
    }

    fn emit_layer_change(&self, old: &RelationshipStrength, new: &RelationshipStrength) {
        debug!(
            from = %new.from_claw,
            to = %new.to_claw,
            old_layer = old.layer.as_str(),
            new_layer = new.layer.as_str(),
            "dunbar layer changed"
        );
        self.bus.emit(EventPayload::RelationshipLayerChanged {
            from_claw: new.from_claw.clone(),
            to_claw: new.to_claw.clone(),
            old_layer: old.layer,
            new_layer: new.layer,
            strength: new.strength,
        });
    }

    /// Seed both directed rows at the initial strength (active layer).
    pub async fn on_friend_accepted(&self, a: &str, b: &str) -> Result<()> {
        let now = self.clock.now();
        for (from, to) in [(a, b), (b, a)] {
            self.storage
                .strengths
                .upsert(RelationshipStrength {
                    from_claw: from.to_string(),
                    to_claw: to.to_string(),
                    strength: INITIAL_STRENGTH,
                    last_boost_at: now,
                    layer: dunbar::layer_for(INITIAL_STRENGTH),
                })
                .await?;
        }
        Ok(())
    }

    /// Drop both directions of a dissolved pair.
    pub async fn on_friend_removed(&self, a: &str, b: &str) -> Result<()> {
        self.storage.strengths.delete_pair(a, b).await
    }
}

/// Bus subscriber translating interactions into boosts and friendship
/// lifecycle into edge seeding/removal.
#[async_trait]
impl EventHandler for RelationshipService {
    fn name(&self) -> &'static str {
        "relationship"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()> {
        match event {
            EventPayload::FriendAccepted { requester_id, accepter_id } => {
                self.on_friend_accepted(requester_id, accepter_id).await
            }
            EventPayload::FriendRemoved { claw_id, friend_id } => {
                self.on_friend_removed(claw_id, friend_id).await
            }
            EventPayload::MessageNew { recipient_id, message, .. } => {
                self.boost(&message.from_claw_id, recipient_id, InteractionKind::Message).await
            }
            EventPayload::ReactionAdded { recipient_id, reactor_id, .. } => {
                self.boost(reactor_id, recipient_id, InteractionKind::Reaction).await
            }
            EventPayload::HeartbeatReceived { heartbeat } => {
                self.boost(&heartbeat.from_claw, &heartbeat.to_claw, InteractionKind::Heartbeat)
                    .await
            }
            EventPayload::PearlShared { owner_id, to_claw, .. } => {
                self.boost(owner_id, to_claw, InteractionKind::PearlShare).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_bands_have_inclusive_upper_bounds() {
        assert_eq!(dunbar::layer_for(1.0), DunbarLayer::Core);
        assert_eq!(dunbar::layer_for(0.75), DunbarLayer::Core);
        assert_eq!(dunbar::layer_for(0.7499), DunbarLayer::Sympathy);
        assert_eq!(dunbar::layer_for(0.50), DunbarLayer::Sympathy);
        assert_eq!(dunbar::layer_for(0.4999), DunbarLayer::Active);
        assert_eq!(dunbar::layer_for(0.25), DunbarLayer::Active);
        assert_eq!(dunbar::layer_for(0.2499), DunbarLayer::Casual);
        assert_eq!(dunbar::layer_for(0.0), DunbarLayer::Casual);
    }

    #[test]
    fn one_week_idle_halves_strength() {
        let week_secs = 7.0 * 86_400.0;
        let decayed = dunbar::decay(0.8, week_secs, 7.0);
        assert!((decayed - 0.4).abs() < 1e-9);
    }

    #[test]
    fn decay_is_monotonic_in_elapsed_time() {
        let earlier = dunbar::decay(0.9, 3_600.0, 7.0);
        let later = dunbar::decay(0.9, 7_200.0, 7.0);
        assert!(later <= earlier);
        assert!(earlier <= 0.9);
    }

    #[test]
    fn zero_elapsed_is_identity() {
        assert!((dunbar::decay(0.63, 0.0, 7.0) - 0.63).abs() < f64::EPSILON);
    }
}
