//! Reflex engine.
//!
//! The engine subscribes to a fixed topic set at boot. For every event it
//! evaluates the subject claw's enabled reflexes: Layer-0 matches execute a
//! built-in algorithmic action (subject to the hourly hard constraint),
//! Layer-1 matches enqueue an item for the external cognitive host. Every
//! evaluation writes an audit row; audit failures never block primary
//! effects. Collaborator services that close dependency cycles (router,
//! reactions, heartbeats, batch processor) are attached once during wiring.

pub mod builtins;
pub mod constraints;
pub mod triggers;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, EventHandler};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::events::{BusEvent, EventPayload, Topic};
use crate::heartbeat::HeartbeatService;
use crate::layer1::{BatchProcessor, QueuedItem};
use crate::message::ReactionService;
use crate::model::{ExecutionResult, Reflex, ReflexExecution};
use crate::routing::PearlRouter;
use crate::storage::Storage;

use builtins::names;
use constraints::HourlyConstraint;

/// Emoji used by the phatic micro-reaction.
const PHATIC_EMOJI: &str = "\u{1F44D}";

/// Collaborators attached after construction; written only during wiring.
#[derive(Default)]
struct EngineHooks {
    router: Option<Arc<PearlRouter>>,
    heartbeats: Option<Arc<HeartbeatService>>,
    reactions: Option<Arc<ReactionService>>,
    batch: Option<Arc<BatchProcessor>>,
}

/// Event-driven rule evaluation for every claw.
pub struct ReflexEngine {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
    constraint: HourlyConstraint,
    hooks: RwLock<EngineHooks>,
}

impl ReflexEngine {
    /// The fixed topic set the engine listens on.
    pub const TOPICS: [Topic; 12] = [
        Topic::MessageNew,
        Topic::ReactionAdded,
        Topic::HeartbeatReceived,
        Topic::RelationshipLayerChanged,
        Topic::FriendAccepted,
        Topic::PearlCreated,
        Topic::PearlShared,
        Topic::PearlEndorsed,
        Topic::TimerTick,
        Topic::PollClosingSoon,
        Topic::ThreadContributionAdded,
        Topic::ReflexExecution,
    ];

    pub fn new(storage: Storage, bus: Arc<EventBus>, clock: SharedClock, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            storage,
            bus,
            clock,
            constraint: HourlyConstraint::new(config.hard_max_messages_per_hour),
            hooks: RwLock::new(EngineHooks::default()),
        })
    }

    /// Register the engine on its full topic set.
    pub fn subscribe_all(self: Arc<Self>, bus: &EventBus) {
        for topic in Self::TOPICS {
            bus.subscribe(topic, self.clone());
        }
    }

    pub fn attach_router(&self, router: Arc<PearlRouter>) {
        self.hooks.write().router = Some(router);
    }

    pub fn attach_heartbeats(&self, heartbeats: Arc<HeartbeatService>) {
        self.hooks.write().heartbeats = Some(heartbeats);
    }

    pub fn attach_reactions(&self, reactions: Arc<ReactionService>) {
        self.hooks.write().reactions = Some(reactions);
    }

    pub fn attach_batch_processor(&self, batch: Arc<BatchProcessor>) {
        self.hooks.write().batch = Some(batch);
    }

    /// Layer 1 is active iff a batch processor is attached.
    pub fn layer1_active(&self) -> bool {
        self.hooks.read().batch.is_some()
    }

    // ------------------------------------------------------------------
    // Management API
    // ------------------------------------------------------------------

    /// Idempotently install the six Layer-0 builtins for a claw.
    pub async fn initialize_builtins(&self, owner: &str) -> Result<()> {
        self.storage.reflexes.upsert_many(builtins::layer0(owner)).await
    }

    /// Idempotently install the four Layer-1 builtins for a claw.
    pub async fn initialize_layer1_builtins(&self, owner: &str) -> Result<()> {
        self.storage.reflexes.upsert_many(builtins::layer1(owner)).await
    }

    pub async fn list_reflexes(&self, owner: &str) -> Result<Vec<Reflex>> {
        self.storage.reflexes.list(owner).await
    }

    pub async fn enable_reflex(&self, owner: &str, name: &str) -> Result<()> {
        self.require_reflex(owner, name).await?;
        self.storage.reflexes.set_enabled(owner, name, true).await
    }

    /// Disable a reflex. The audit log reflex is non-disableable.
    pub async fn disable_reflex(&self, owner: &str, name: &str) -> Result<()> {
        if name == names::AUDIT_BEHAVIOR_LOG {
            return Err(CoreError::Forbidden("audit_behavior_log cannot be disabled".into()));
        }
        self.require_reflex(owner, name).await?;
        self.storage.reflexes.set_enabled(owner, name, false).await
    }

    async fn require_reflex(&self, owner: &str, name: &str) -> Result<Reflex> {
        self.storage
            .reflexes
            .find_by_name(owner, name)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reflex {name}")))
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    async fn process_event(&self, event: &EventPayload) -> Result<()> {
        let canonical = event.to_bus_event();
        let owners: Vec<String> = if canonical.claw_id.is_empty() {
            // Timer ticks address every claw with reflexes installed.
            self.storage.reflexes.owners_with_enabled().await?
        } else {
            vec![canonical.claw_id.clone()]
        };
        for owner in owners {
            if let Err(err) = self.process_owner(&owner, event, &canonical).await {
                warn!(owner = %owner, error = %err, "reflex processing failed");
            }
        }
        Ok(())
    }

    async fn process_owner(
        &self,
        owner: &str,
        event: &EventPayload,
        canonical: &BusEvent,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut audited: Vec<(ReflexExecution, String)> = Vec::new();

        for reflex in self.storage.reflexes.find_enabled(owner, Some(0)).await? {
            if !triggers::matches(&reflex.trigger, canonical, now) {
                continue;
            }
            let exempt = constraints::is_exempt(&reflex.behavior);
            if !exempt && self.constraint.would_block(owner, now) {
                debug!(owner, reflex = %reflex.name, "execution blocked by hard constraint");
                if let Some(row) = self
                    .audit(&reflex, canonical, ExecutionResult::Blocked,
                        json!({"reason": "hard_constraint"}), None)
                    .await
                {
                    audited.push((row, reflex.behavior.clone()));
                }
                continue;
            }

            let details = match self.run_layer0_action(&reflex, event, canonical).await {
                Ok(details) => details,
                Err(err) => {
                    warn!(owner, reflex = %reflex.name, error = %err, "layer-0 action failed");
                    json!({"error": err.to_string()})
                }
            };
            if !exempt {
                self.constraint.record(owner, now);
            }
            if let Some(row) =
                self.audit(&reflex, canonical, ExecutionResult::Executed, details, None).await
            {
                audited.push((row, reflex.behavior.clone()));
            }
        }

        for reflex in self.storage.reflexes.find_enabled(owner, Some(1)).await? {
            if !triggers::matches(&reflex.trigger, canonical, now) {
                continue;
            }
            if let Some(row) = self.dispatch_layer1(&reflex, event, canonical).await? {
                audited.push((row, reflex.behavior.clone()));
            }
        }

        // The synthetic execution event feeds the audit reflex. Executions
        // triggered by the synthetic event itself stay quiet, which keeps
        // the graph acyclic.
        if event.topic() != Topic::ReflexExecution {
            for (row, behavior) in audited {
                self.bus.emit(EventPayload::ReflexExecution {
                    owner_id: row.owner_id,
                    reflex_name: row.reflex_name,
                    behavior,
                    result: row.result.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn run_layer0_action(
        &self,
        reflex: &Reflex,
        event: &EventPayload,
        canonical: &BusEvent,
    ) -> Result<serde_json::Value> {
        match reflex.name.as_str() {
            names::KEEPALIVE_HEARTBEAT => {
                let heartbeats = self
                    .hooks
                    .read()
                    .heartbeats
                    .clone()
                    .ok_or_else(|| CoreError::NotConfigured("heartbeat service".into()))?;
                let interests: Vec<String> = match self.storage.claws.find(&reflex.owner_id).await? {
                    Some(claw) => claw.tags.into_iter().collect(),
                    None => Vec::new(),
                };
                let sent = heartbeats.broadcast(&reflex.owner_id, "keepalive", interests).await?;
                Ok(json!({"sent": sent}))
            }
            names::PHATIC_MICRO_REACTION => {
                let EventPayload::MessageNew { message, .. } = event else {
                    return Ok(json!({"skipped": "no message payload"}));
                };
                let reactions = self
                    .hooks
                    .read()
                    .reactions
                    .clone()
                    .ok_or_else(|| CoreError::NotConfigured("reaction service".into()))?;
                reactions.add(&reflex.owner_id, &message.id, PHATIC_EMOJI).await?;
                Ok(json!({"emoji": PHATIC_EMOJI, "messageId": message.id}))
            }
            names::RELATIONSHIP_DECAY_ALERT => {
                info!(
                    owner = %reflex.owner_id,
                    from = canonical.data.get("fromClaw").and_then(|v| v.as_str()).unwrap_or(""),
                    to = canonical.data.get("toClaw").and_then(|v| v.as_str()).unwrap_or(""),
                    "relationship downgrade"
                );
                Ok(json!({
                    "toClaw": canonical.data.get("toClaw").cloned().unwrap_or_default(),
                    "oldLayer": canonical.data.get("oldLayer").cloned().unwrap_or_default(),
                    "newLayer": canonical.data.get("newLayer").cloned().unwrap_or_default(),
                }))
            }
            names::COLLECT_POLL_RESPONSES => Ok(json!({
                "pollId": canonical.data.get("pollId").cloned().unwrap_or_default(),
                "closesAt": canonical.data.get("closesAt").cloned().unwrap_or_default(),
            })),
            // Statistics belong to the briefing component; this action only
            // leaves a tracking mark in the audit log.
            names::TRACK_THREAD_PROGRESS => Ok(json!({
                "threadId": canonical.data.get("threadId").cloned().unwrap_or_default(),
                "contributionCount": canonical.data.get("contributionCount").cloned().unwrap_or_default(),
            })),
            names::AUDIT_BEHAVIOR_LOG => Ok(json!({})),
            other => {
                debug!(reflex = other, "no built-in action for reflex");
                Ok(json!({"skipped": "unknown action"}))
            }
        }
    }

    async fn dispatch_layer1(
        &self,
        reflex: &Reflex,
        event: &EventPayload,
        canonical: &BusEvent,
    ) -> Result<Option<ReflexExecution>> {
        let mut trigger_data = canonical.data.clone();

        if reflex.name == names::ROUTE_PEARL_BY_INTEREST {
            let EventPayload::HeartbeatReceived { heartbeat } = event else {
                return Ok(None);
            };
            let router = self.hooks.read().router.clone();
            let Some(router) = router else {
                debug!(owner = %reflex.owner_id, "no router attached, skipping routing");
                return Ok(None);
            };
            let context = router
                .build_context(&reflex.owner_id, &heartbeat.from_claw, &heartbeat.interests)
                .await?;
            let Some(context) = context else {
                return Ok(None);
            };
            if router.frequency_cap_hit(&reflex.owner_id, &heartbeat.from_claw).await? {
                debug!(
                    owner = %reflex.owner_id,
                    friend = %heartbeat.from_claw,
                    "routing frequency cap hit, dropping"
                );
                return Ok(None);
            }
            trigger_data = json!({
                "targetClawId": heartbeat.from_claw,
                "routingContext": context,
            });
        }

        let item = QueuedItem {
            reflex_id: reflex.id.clone(),
            reflex_name: reflex.name.clone(),
            claw_id: reflex.owner_id.clone(),
            event_type: canonical.event_type.clone(),
            trigger_data: trigger_data.clone(),
            enqueued_at: self.clock.now(),
        };

        let row = self
            .audit(reflex, canonical, ExecutionResult::QueuedForL1, trigger_data, None)
            .await;

        // Without a processor the engine stays correct; Layer 1 is inert.
        let batch = self.hooks.read().batch.clone();
        if let Some(batch) = batch {
            if let Err(err) = batch.enqueue(item).await {
                warn!(owner = %reflex.owner_id, error = %err, "layer-1 enqueue failed");
            }
        }
        Ok(row)
    }

    /// Write an audit row. Failures are logged, never propagated: audit
    /// writes must not prevent primary effects.
    async fn audit(
        &self,
        reflex: &Reflex,
        canonical: &BusEvent,
        result: ExecutionResult,
        details: serde_json::Value,
        batch_id: Option<String>,
    ) -> Option<ReflexExecution> {
        let row = ReflexExecution {
            id: Uuid::new_v4().to_string(),
            reflex_id: reflex.id.clone(),
            reflex_name: reflex.name.clone(),
            owner_id: reflex.owner_id.clone(),
            event_type: canonical.event_type.clone(),
            trigger_payload: canonical.data.clone(),
            result,
            details,
            batch_id,
            created_at: self.clock.now(),
        };
        match self.storage.executions.insert(row.clone()).await {
            Ok(()) => Some(row),
            Err(err) => {
                warn!(reflex = %reflex.name, error = %err, "audit write failed");
                None
            }
        }
    }
}

#[async_trait]
impl EventHandler for ReflexEngine {
    fn name(&self) -> &'static str {
        "reflex_engine"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()> {
        self.process_event(event).await
    }
}
