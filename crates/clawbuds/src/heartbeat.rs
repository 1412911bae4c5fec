//! Heartbeats and the proxy friend model.
//!
//! A heartbeat is a lightweight status/interest broadcast from one claw to
//! each of its accepted friends. The receiving side aggregates the stream
//! into a per-friend model (a cheap theory-of-mind proxy) that routing and
//! briefing read instead of raw heartbeat history.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{EventBus, EventHandler};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::events::EventPayload;
use crate::model::{FriendModel, Heartbeat};
use crate::storage::Storage;

/// Broadcast and ingestion of heartbeats.
pub struct HeartbeatService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
}

impl HeartbeatService {
    pub fn new(storage: Storage, bus: Arc<EventBus>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock })
    }

    /// Send one heartbeat to every accepted friend of `from`.
    ///
    /// Returns the number of friends reached. Each heartbeat is persisted
    /// and re-emitted as `heartbeat.received` on the recipient side.
    pub async fn broadcast(
        &self,
        from: &str,
        status: &str,
        interests: Vec<String>,
    ) -> Result<u32> {
        let friends = self.storage.friendships.list_friends(from).await?;
        let mut sent = 0u32;
        for friend in friends {
            let heartbeat = Heartbeat {
                id: Uuid::new_v4().to_string(),
                from_claw: from.to_string(),
                to_claw: friend,
                status: status.to_string(),
                interests: interests.clone(),
                created_at: self.clock.now(),
            };
            self.storage.heartbeats.insert(heartbeat.clone()).await?;
            self.bus.emit(EventPayload::HeartbeatReceived { heartbeat });
            sent += 1;
        }
        debug!(from, sent, "heartbeat broadcast");
        Ok(sent)
    }

    /// Ingest a single heartbeat addressed to a local claw (federation
    /// delivery path). Persists it and emits `heartbeat.received`.
    pub async fn receive(&self, heartbeat: Heartbeat) -> Result<()> {
        self.storage.heartbeats.insert(heartbeat.clone()).await?;
        self.bus.emit(EventPayload::HeartbeatReceived { heartbeat });
        Ok(())
    }

    /// The interests a friend last declared toward `observer`, if any.
    pub async fn latest_interests(&self, from: &str, observer: &str) -> Result<Vec<String>> {
        Ok(self
            .storage
            .heartbeats
            .latest_from(from, observer)
            .await?
            .map(|h| h.interests)
            .unwrap_or_default())
    }
}

/// Aggregates received heartbeats into per-friend models.
pub struct FriendModelService {
    storage: Storage,
    clock: SharedClock,
}

impl FriendModelService {
    pub fn new(storage: Storage, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, clock })
    }

    /// Fold one heartbeat into the observer's model of the sender.
    pub async fn observe(&self, heartbeat: &Heartbeat) -> Result<()> {
        let mut model = self
            .storage
            .friend_models
            .get(&heartbeat.to_claw, &heartbeat.from_claw)
            .await?
            .unwrap_or_else(|| FriendModel {
                observer_id: heartbeat.to_claw.clone(),
                friend_id: heartbeat.from_claw.clone(),
                interest_counts: Default::default(),
                last_status: String::new(),
                updated_at: self.clock.now(),
            });
        for interest in &heartbeat.interests {
            *model.interest_counts.entry(interest.clone()).or_insert(0) += 1;
        }
        model.last_status = heartbeat.status.clone();
        model.updated_at = self.clock.now();
        self.storage.friend_models.upsert(model).await
    }

    pub async fn get(&self, observer: &str, friend: &str) -> Result<Option<FriendModel>> {
        self.storage.friend_models.get(observer, friend).await
    }
}

#[async_trait]
impl EventHandler for FriendModelService {
    fn name(&self) -> &'static str {
        "friend_model"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()> {
        if let EventPayload::HeartbeatReceived { heartbeat } = event {
            self.observe(heartbeat).await?;
        }
        Ok(())
    }
}
