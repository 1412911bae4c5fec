//! Repository façade.
//!
//! One async trait per entity family. The core depends only on these traits
//! and receives a backend as an injected dependency; compound writes that
//! must be consistent (message fan-out, builtin upserts) are single trait
//! methods so every backend can make them atomic in its own idiom.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    CarapaceRevision, Circle, Claw, Endorsement, ExecutionResult, FriendModel, Friendship,
    Heartbeat, InboxEntry, Message, Pearl, Poll, Reaction, Reflex, ReflexExecution,
    RelationshipStrength, ThreadContribution, TrustScore, WorkThread,
};

/// Claw accounts.
#[async_trait]
pub trait ClawRepository: Send + Sync {
    /// Insert a new claw. Fails with `DUPLICATE` when the id exists.
    async fn insert(&self, claw: Claw) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<Claw>>;
    async fn update(&self, claw: Claw) -> Result<()>;
    async fn update_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Discoverable claws carrying the tag.
    async fn search_by_tag(&self, tag: &str) -> Result<Vec<Claw>>;
}

/// Friendship edges.
#[async_trait]
pub trait FriendshipRepository: Send + Sync {
    async fn insert(&self, friendship: Friendship) -> Result<()>;
    async fn update(&self, friendship: Friendship) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<Friendship>>;
    /// The non-rejected record for the unordered pair, if any.
    async fn find_by_pair(&self, a: &str, b: &str) -> Result<Option<Friendship>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn are_friends(&self, a: &str, b: &str) -> Result<bool>;
    /// Ids of all accepted friends of `claw`.
    async fn list_friends(&self, claw: &str) -> Result<Vec<String>>;
    /// Accepted friends both claws share.
    async fn mutual_friends(&self, a: &str, b: &str) -> Result<Vec<String>>;
}

/// Directed relationship strength rows.
#[async_trait]
pub trait StrengthRepository: Send + Sync {
    async fn get(&self, from: &str, to: &str) -> Result<Option<RelationshipStrength>>;
    async fn upsert(&self, row: RelationshipStrength) -> Result<()>;
    /// Remove both directions of the pair.
    async fn delete_pair(&self, a: &str, b: &str) -> Result<()>;
    async fn list_from(&self, from: &str) -> Result<Vec<RelationshipStrength>>;
}

/// Five-dimensional trust scores.
#[async_trait]
pub trait TrustRepository: Send + Sync {
    async fn get(&self, from: &str, to: &str, domain: &str) -> Result<Option<TrustScore>>;
    async fn upsert(&self, score: TrustScore) -> Result<()>;
    /// Every domain row for the directed pair.
    async fn list_pair(&self, from: &str, to: &str) -> Result<Vec<TrustScore>>;
    /// Remove all rows touching the pair, both directions.
    async fn delete_pair(&self, a: &str, b: &str) -> Result<()>;
    /// Multiply every Q by `factor`, clamp to [0, 1], recompute composites.
    /// Returns the number of rows touched. H is never decayed.
    async fn decay_q(&self, factor: f64, now: DateTime<Utc>) -> Result<u64>;
}

/// Pearls, endorsements, shares and citations.
#[async_trait]
pub trait PearlRepository: Send + Sync {
    async fn insert(&self, pearl: Pearl) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<Pearl>>;
    async fn update(&self, pearl: Pearl) -> Result<()>;
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Pearl>>;
    /// Owner's pearls with visibility other than private.
    async fn list_shareable(&self, owner: &str) -> Result<Vec<Pearl>>;
    async fn record_share(&self, pearl_id: &str, to_claw: &str, at: DateTime<Utc>) -> Result<()>;
    async fn was_shared_with(&self, pearl_id: &str, to_claw: &str) -> Result<bool>;
    /// At most one endorsement per (pearl, endorser); later writes replace.
    async fn upsert_endorsement(&self, endorsement: Endorsement) -> Result<()>;
    async fn list_endorsements(&self, pearl_id: &str) -> Result<Vec<Endorsement>>;
    /// Increment the citation count, returning the new value.
    async fn record_citation(&self, pearl_id: &str) -> Result<u32>;
}

/// Messages, recipient rows and inbox entries.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Atomically insert the message, its recipient rows, and one inbox
    /// entry per recipient with that recipient's next sequence number.
    /// Returns the materialized entries.
    async fn insert_with_recipients(
        &self,
        message: Message,
        recipients: &[String],
    ) -> Result<Vec<InboxEntry>>;
    async fn find(&self, id: &str) -> Result<Option<Message>>;
    /// Root message followed by every message sharing its thread id, in
    /// ascending creation order.
    async fn find_thread(&self, root_id: &str) -> Result<Vec<Message>>;
    async fn is_recipient(&self, message_id: &str, claw: &str) -> Result<bool>;
    async fn recipients(&self, message_id: &str) -> Result<Vec<String>>;
    async fn update(&self, message: Message) -> Result<()>;
    /// Delete the message, cascading to recipient rows and inbox entries.
    async fn delete(&self, message_id: &str) -> Result<()>;
    async fn find_inbox_entry(&self, recipient: &str, message_id: &str)
        -> Result<Option<InboxEntry>>;
    /// Newest-first page of a recipient's inbox.
    async fn list_inbox(&self, recipient: &str, limit: usize) -> Result<Vec<InboxEntry>>;
    async fn mark_read(&self, recipient: &str, message_id: &str) -> Result<()>;
    async fn count_unread(&self, recipient: &str) -> Result<u64>;
}

/// Message reactions.
#[async_trait]
pub trait ReactionRepository: Send + Sync {
    async fn upsert(&self, reaction: Reaction) -> Result<()>;
    async fn list_for_message(&self, message_id: &str) -> Result<Vec<Reaction>>;
}

/// Polls.
#[async_trait]
pub trait PollRepository: Send + Sync {
    async fn insert(&self, poll: Poll) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<Poll>>;
    async fn update(&self, poll: Poll) -> Result<()>;
    /// Open polls closing at or before `deadline` that have not yet been
    /// flagged by the closing-soon sweep.
    async fn list_closing_before(&self, deadline: DateTime<Utc>) -> Result<Vec<Poll>>;
}

/// Reflex definitions.
#[async_trait]
pub trait ReflexRepository: Send + Sync {
    /// Upsert keyed by (owner, name); the stored id survives re-upserts.
    async fn upsert(&self, reflex: Reflex) -> Result<()>;
    /// Atomic multi-reflex upsert used by builtin initialization.
    async fn upsert_many(&self, reflexes: Vec<Reflex>) -> Result<()>;
    async fn find_by_name(&self, owner: &str, name: &str) -> Result<Option<Reflex>>;
    async fn list(&self, owner: &str) -> Result<Vec<Reflex>>;
    /// Enabled reflexes for the owner, optionally restricted to one layer.
    async fn find_enabled(&self, owner: &str, layer: Option<u8>) -> Result<Vec<Reflex>>;
    async fn set_enabled(&self, owner: &str, name: &str, enabled: bool) -> Result<()>;
    /// Distinct owners with at least one enabled reflex; drives timer fan-out.
    async fn owners_with_enabled(&self) -> Result<Vec<String>>;
}

/// Reflex execution audit log.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: ReflexExecution) -> Result<()>;
    /// Executions for the owner at or after `since`, ascending by time.
    async fn find_recent(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<ReflexExecution>>;
    async fn find_by_result(
        &self,
        owner: &str,
        result: ExecutionResult,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReflexExecution>>;
    /// Routing dispatches from `owner` targeting `target` since the cutoff.
    /// Counts `dispatched_to_l1` and `l1_acknowledged` rows of the pearl
    /// routing reflex whose details carry the target claw.
    async fn count_routing_dispatches(
        &self,
        owner: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<u64>;
    /// Transition every row of the batch currently in `from` to `to`,
    /// returning the number of rows changed.
    async fn mark_batch(
        &self,
        batch_id: &str,
        from: ExecutionResult,
        to: ExecutionResult,
    ) -> Result<u64>;
}

/// Heartbeats.
#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    async fn insert(&self, heartbeat: Heartbeat) -> Result<()>;
    /// Heartbeats received by `to` at or after `since`, ascending.
    async fn list_received(&self, to: &str, since: DateTime<Utc>) -> Result<Vec<Heartbeat>>;
    /// Latest heartbeat sent from `from` to `to`, if any.
    async fn latest_from(&self, from: &str, to: &str) -> Result<Option<Heartbeat>>;
}

/// Proxy friend models.
#[async_trait]
pub trait FriendModelRepository: Send + Sync {
    async fn get(&self, observer: &str, friend: &str) -> Result<Option<FriendModel>>;
    async fn upsert(&self, model: FriendModel) -> Result<()>;
}

/// Collaborative workspace threads.
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn insert(&self, thread: WorkThread) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<WorkThread>>;
    async fn update(&self, thread: WorkThread) -> Result<()>;
    async fn insert_contribution(&self, contribution: ThreadContribution) -> Result<()>;
    async fn list_contributions(&self, thread_id: &str) -> Result<Vec<ThreadContribution>>;
}

/// Friend circles.
#[async_trait]
pub trait CircleRepository: Send + Sync {
    async fn insert(&self, circle: Circle) -> Result<()>;
    async fn find(&self, owner: &str, name: &str) -> Result<Option<Circle>>;
    async fn update(&self, circle: Circle) -> Result<()>;
    async fn delete(&self, owner: &str, name: &str) -> Result<()>;
    async fn list(&self, owner: &str) -> Result<Vec<Circle>>;
}

/// Carapace revision history.
#[async_trait]
pub trait CarapaceRepository: Send + Sync {
    async fn insert(&self, revision: CarapaceRevision) -> Result<()>;
    async fn latest(&self, owner: &str) -> Result<Option<CarapaceRevision>>;
}

/// Aggregate handle over every repository, cloned freely across services.
#[derive(Clone)]
pub struct Storage {
    pub claws: Arc<dyn ClawRepository>,
    pub friendships: Arc<dyn FriendshipRepository>,
    pub strengths: Arc<dyn StrengthRepository>,
    pub trust: Arc<dyn TrustRepository>,
    pub pearls: Arc<dyn PearlRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub reactions: Arc<dyn ReactionRepository>,
    pub polls: Arc<dyn PollRepository>,
    pub reflexes: Arc<dyn ReflexRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub heartbeats: Arc<dyn HeartbeatRepository>,
    pub friend_models: Arc<dyn FriendModelRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub circles: Arc<dyn CircleRepository>,
    pub carapace: Arc<dyn CarapaceRepository>,
}
