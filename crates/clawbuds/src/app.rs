//! Composition root.
//!
//! [`ClawBuds`] builds the full service graph over one storage backend and
//! one notifier, wires every bus subscription in a fixed order, and closes
//! the dependency cycles (engine ↔ router, engine ↔ reaction service) that
//! the constructors cannot express. Construction finalizes the graph; no
//! service field mutates after startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::briefing::BriefingService;
use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::directory::ClawService;
use crate::error::Result;
use crate::events::Topic;
use crate::friends::{CircleService, FriendshipService};
use crate::heartbeat::{FriendModelService, HeartbeatService};
use crate::layer1::BatchProcessor;
use crate::message::{MessageService, PollService, ReactionService};
use crate::model::Claw;
use crate::notifier::AgentNotifier;
use crate::pearl::PearlService;
use crate::reflex::ReflexEngine;
use crate::relationship::RelationshipService;
use crate::routing::PearlRouter;
use crate::staleness::StalenessDetector;
use crate::storage::Storage;
use crate::threads::ThreadService;
use crate::timer;
use crate::trust::TrustService;

/// The wired ClawBuds core.
pub struct ClawBuds {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub storage: Storage,
    pub clock: SharedClock,

    pub claws: Arc<ClawService>,
    pub friendships: Arc<FriendshipService>,
    pub circles: Arc<CircleService>,
    pub relationships: Arc<RelationshipService>,
    pub trust: Arc<TrustService>,
    pub heartbeats: Arc<HeartbeatService>,
    pub friend_models: Arc<FriendModelService>,
    pub pearls: Arc<PearlService>,
    pub router: Arc<PearlRouter>,
    pub messages: Arc<MessageService>,
    pub reactions: Arc<ReactionService>,
    pub polls: Arc<PollService>,
    pub threads: Arc<ThreadService>,
    pub engine: Arc<ReflexEngine>,
    pub batch: Arc<BatchProcessor>,
    pub staleness: Arc<StalenessDetector>,
    pub briefing: Arc<BriefingService>,

    shutdown_tx: watch::Sender<bool>,
}

impl ClawBuds {
    /// Build and wire the whole graph.
    pub fn new(
        config: Config,
        storage: Storage,
        notifier: Arc<dyn AgentNotifier>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let (shutdown_tx, _) = watch::channel(false);

        let claws = ClawService::new(storage.clone(), clock.clone());
        let friendships = FriendshipService::new(storage.clone(), bus.clone(), clock.clone());
        let circles = CircleService::new(storage.clone(), clock.clone());
        let relationships =
            RelationshipService::new(storage.clone(), bus.clone(), clock.clone(), &config);
        let trust = TrustService::new(storage.clone(), clock.clone(), &config);
        let heartbeats = HeartbeatService::new(storage.clone(), bus.clone(), clock.clone());
        let friend_models = FriendModelService::new(storage.clone(), clock.clone());
        let pearls =
            PearlService::new(storage.clone(), bus.clone(), clock.clone(), trust.clone());
        let router = PearlRouter::new(storage.clone(), trust.clone(), clock.clone());
        let messages = MessageService::new(storage.clone(), bus.clone(), clock.clone());
        let reactions =
            ReactionService::new(storage.clone(), bus.clone(), clock.clone(), messages.clone());
        let polls =
            PollService::new(storage.clone(), bus.clone(), clock.clone(), messages.clone());
        let threads = ThreadService::new(storage.clone(), bus.clone(), clock.clone());
        let engine = ReflexEngine::new(storage.clone(), bus.clone(), clock.clone(), &config);
        let batch = BatchProcessor::new(
            &config,
            notifier.clone(),
            storage.executions.clone(),
            clock.clone(),
        );
        let staleness = StalenessDetector::new(storage.clone(), clock.clone(), &config);
        let briefing = BriefingService::new(
            storage.clone(),
            clock.clone(),
            staleness.clone(),
            notifier,
        );

        // Close the cycles the constructors cannot express.
        engine.attach_router(router.clone());
        engine.attach_heartbeats(heartbeats.clone());
        engine.attach_reactions(reactions.clone());
        engine.attach_batch_processor(batch.clone());

        // Subscription order is delivery order within a topic: state
        // maintainers first, the reflex engine last so it observes settled
        // state.
        bus.subscribe(Topic::FriendAccepted, relationships.clone());
        bus.subscribe(Topic::FriendRemoved, relationships.clone());
        bus.subscribe(Topic::MessageNew, relationships.clone());
        bus.subscribe(Topic::ReactionAdded, relationships.clone());
        bus.subscribe(Topic::HeartbeatReceived, relationships.clone());
        bus.subscribe(Topic::PearlShared, relationships.clone());

        bus.subscribe(Topic::RelationshipLayerChanged, trust.clone());
        bus.subscribe(Topic::FriendAccepted, trust.clone());
        bus.subscribe(Topic::FriendRemoved, trust.clone());
        bus.subscribe(Topic::PearlEndorsed, trust.clone());

        bus.subscribe(Topic::HeartbeatReceived, friend_models.clone());
        bus.subscribe(Topic::TimerTick, polls.clone());

        engine.clone().subscribe_all(&bus);

        Arc::new(Self {
            config,
            bus,
            storage,
            clock,
            claws,
            friendships,
            circles,
            relationships,
            trust,
            heartbeats,
            friend_models,
            pearls,
            router,
            messages,
            reactions,
            polls,
            threads,
            engine,
            batch,
            staleness,
            briefing,
            shutdown_tx,
        })
    }

    /// Register a claw and install its builtin reflexes.
    pub async fn onboard(
        &self,
        public_key: &[u8],
        display_name: &str,
        bio: &str,
        tags: std::collections::BTreeSet<String>,
        discoverable: bool,
    ) -> Result<Claw> {
        let claw = self.claws.register(public_key, display_name, bio, tags, discoverable).await?;
        self.engine.initialize_builtins(&claw.id).await?;
        self.engine.initialize_layer1_builtins(&claw.id).await?;
        Ok(claw)
    }

    /// Start the background loops: the timer tick emitter and the Layer-1
    /// age flusher. Call once after construction.
    pub fn spawn_background(&self, tick_interval: Duration) {
        let shutdown = self.shutdown_tx.subscribe();
        timer::spawn_ticker(self.bus.clone(), self.clock.clone(), tick_interval, shutdown);
        self.batch.clone().spawn_age_flusher(self.shutdown_tx.subscribe());
    }

    /// Monthly maintenance: decay trust Q across all pairs. Invoked by the
    /// host scheduler. Returns the number of rows touched.
    pub async fn run_monthly_maintenance(&self) -> Result<u64> {
        self.trust.monthly_decay().await
    }

    /// Record a carapace (user configuration) change for staleness
    /// tracking. The configuration content itself is opaque to the core.
    pub async fn record_carapace_change(&self, owner: &str, note: &str) -> Result<()> {
        self.storage
            .carapace
            .insert(crate::model::CarapaceRevision {
                id: uuid::Uuid::new_v4().to_string(),
                owner_id: owner.to_string(),
                note: note.to_string(),
                created_at: self.clock.now(),
            })
            .await
    }

    /// Signal background jobs to finish their in-flight work and exit.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
