//! In-memory storage backend.
//!
//! A single lock over the whole state makes every compound write atomic by
//! construction. Intended for tests, development and single-node trials;
//! all data is lost when the process exits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{
    CarapaceRevision, Circle, Claw, Endorsement, ExecutionResult, FriendModel, Friendship,
    Heartbeat, InboxEntry, Message, Pearl, Poll, Reaction, Reflex, ReflexExecution,
    RelationshipStrength, ThreadContribution, TrustScore, WorkThread,
};
use crate::reflex::builtins::names::ROUTE_PEARL_BY_INTEREST;
use crate::trust::composite_score;

use super::traits::*;

#[derive(Default)]
struct MemoryState {
    claws: HashMap<String, Claw>,
    friendships: HashMap<String, Friendship>,
    strengths: HashMap<(String, String), RelationshipStrength>,
    trust: HashMap<(String, String, String), TrustScore>,
    pearls: HashMap<String, Pearl>,
    endorsements: HashMap<(String, String), Endorsement>,
    shares: HashSet<(String, String)>,
    messages: HashMap<String, Message>,
    recipients: HashMap<String, Vec<String>>,
    inbox: HashMap<String, Vec<InboxEntry>>,
    seq: HashMap<String, u64>,
    reactions: HashMap<(String, String), Reaction>,
    polls: HashMap<String, Poll>,
    reflexes: HashMap<(String, String), Reflex>,
    executions: Vec<ReflexExecution>,
    heartbeats: Vec<Heartbeat>,
    friend_models: HashMap<(String, String), FriendModel>,
    threads: HashMap<String, WorkThread>,
    contributions: HashMap<String, Vec<ThreadContribution>>,
    circles: HashMap<(String, String), Circle>,
    carapace: Vec<CarapaceRevision>,
}

/// Whole-state in-memory store implementing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Storage`] handle whose every repository is this store.
    pub fn into_storage(self) -> Storage {
        let store = Arc::new(self);
        Storage {
            claws: store.clone(),
            friendships: store.clone(),
            strengths: store.clone(),
            trust: store.clone(),
            pearls: store.clone(),
            messages: store.clone(),
            reactions: store.clone(),
            polls: store.clone(),
            reflexes: store.clone(),
            executions: store.clone(),
            heartbeats: store.clone(),
            friend_models: store.clone(),
            threads: store.clone(),
            circles: store.clone(),
            carapace: store,
        }
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

#[async_trait]
impl ClawRepository for MemoryStore {
    async fn insert(&self, claw: Claw) -> Result<()> {
        let mut state = self.state.write();
        if state.claws.contains_key(&claw.id) {
            return Err(CoreError::Duplicate(format!("claw {}", claw.id)));
        }
        state.claws.insert(claw.id.clone(), claw);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Claw>> {
        Ok(self.state.read().claws.get(id).cloned())
    }

    async fn update(&self, claw: Claw) -> Result<()> {
        let mut state = self.state.write();
        if !state.claws.contains_key(&claw.id) {
            return Err(CoreError::NotFound(format!("claw {}", claw.id)));
        }
        state.claws.insert(claw.id.clone(), claw);
        Ok(())
    }

    async fn update_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        match state.claws.get_mut(id) {
            Some(claw) => {
                claw.last_seen_at = at;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("claw {id}"))),
        }
    }

    async fn search_by_tag(&self, tag: &str) -> Result<Vec<Claw>> {
        let state = self.state.read();
        let mut found: Vec<Claw> = state
            .claws
            .values()
            .filter(|c| c.discoverable && c.tags.contains(tag))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[async_trait]
impl FriendshipRepository for MemoryStore {
    async fn insert(&self, friendship: Friendship) -> Result<()> {
        let mut state = self.state.write();
        state.friendships.insert(friendship.id.clone(), friendship);
        Ok(())
    }

    async fn update(&self, friendship: Friendship) -> Result<()> {
        let mut state = self.state.write();
        if !state.friendships.contains_key(&friendship.id) {
            return Err(CoreError::NotFound(format!("friendship {}", friendship.id)));
        }
        state.friendships.insert(friendship.id.clone(), friendship);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Friendship>> {
        Ok(self.state.read().friendships.get(id).cloned())
    }

    async fn find_by_pair(&self, a: &str, b: &str) -> Result<Option<Friendship>> {
        let state = self.state.read();
        Ok(state
            .friendships
            .values()
            .find(|f| {
                f.status != crate::model::FriendshipStatus::Rejected
                    && ((f.requester_id == a && f.accepter_id == b)
                        || (f.requester_id == b && f.accepter_id == a))
            })
            .cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.state.write().friendships.remove(id);
        Ok(())
    }

    async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        let state = self.state.read();
        Ok(state.friendships.values().any(|f| {
            f.status == crate::model::FriendshipStatus::Accepted
                && ((f.requester_id == a && f.accepter_id == b)
                    || (f.requester_id == b && f.accepter_id == a))
        }))
    }

    async fn list_friends(&self, claw: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut friends: Vec<String> = state
            .friendships
            .values()
            .filter(|f| f.status == crate::model::FriendshipStatus::Accepted)
            .filter_map(|f| f.other(claw).map(str::to_string))
            .collect();
        friends.sort();
        friends.dedup();
        Ok(friends)
    }

    async fn mutual_friends(&self, a: &str, b: &str) -> Result<Vec<String>> {
        let of_a: HashSet<String> = self.list_friends(a).await?.into_iter().collect();
        let of_b: HashSet<String> = self.list_friends(b).await?.into_iter().collect();
        let mut mutual: Vec<String> = of_a.intersection(&of_b).cloned().collect();
        mutual.sort();
        Ok(mutual)
    }
}

#[async_trait]
impl StrengthRepository for MemoryStore {
    async fn get(&self, from: &str, to: &str) -> Result<Option<RelationshipStrength>> {
        Ok(self.state.read().strengths.get(&pair_key(from, to)).cloned())
    }

    async fn upsert(&self, row: RelationshipStrength) -> Result<()> {
        let mut state = self.state.write();
        state.strengths.insert(pair_key(&row.from_claw, &row.to_claw), row);
        Ok(())
    }

    async fn delete_pair(&self, a: &str, b: &str) -> Result<()> {
        let mut state = self.state.write();
        state.strengths.remove(&pair_key(a, b));
        state.strengths.remove(&pair_key(b, a));
        Ok(())
    }

    async fn list_from(&self, from: &str) -> Result<Vec<RelationshipStrength>> {
        let state = self.state.read();
        let mut rows: Vec<RelationshipStrength> =
            state.strengths.values().filter(|r| r.from_claw == from).cloned().collect();
        rows.sort_by(|a, b| a.to_claw.cmp(&b.to_claw));
        Ok(rows)
    }
}

#[async_trait]
impl TrustRepository for MemoryStore {
    async fn get(&self, from: &str, to: &str, domain: &str) -> Result<Option<TrustScore>> {
        let key = (from.to_string(), to.to_string(), domain.to_string());
        Ok(self.state.read().trust.get(&key).cloned())
    }

    async fn upsert(&self, score: TrustScore) -> Result<()> {
        let mut state = self.state.write();
        let key = (score.from_claw.clone(), score.to_claw.clone(), score.domain.clone());
        state.trust.insert(key, score);
        Ok(())
    }

    async fn list_pair(&self, from: &str, to: &str) -> Result<Vec<TrustScore>> {
        let state = self.state.read();
        let mut rows: Vec<TrustScore> = state
            .trust
            .values()
            .filter(|t| t.from_claw == from && t.to_claw == to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(rows)
    }

    async fn delete_pair(&self, a: &str, b: &str) -> Result<()> {
        let mut state = self.state.write();
        state.trust.retain(|_, t| {
            !((t.from_claw == a && t.to_claw == b) || (t.from_claw == b && t.to_claw == a))
        });
        Ok(())
    }

    async fn decay_q(&self, factor: f64, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write();
        let mut touched = 0u64;
        for score in state.trust.values_mut() {
            score.q = (score.q * factor).clamp(0.0, 1.0);
            score.composite = composite_score(score.q, score.h, score.n, score.w);
            score.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl PearlRepository for MemoryStore {
    async fn insert(&self, pearl: Pearl) -> Result<()> {
        let mut state = self.state.write();
        if state.pearls.contains_key(&pearl.id) {
            return Err(CoreError::Duplicate(format!("pearl {}", pearl.id)));
        }
        state.pearls.insert(pearl.id.clone(), pearl);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Pearl>> {
        Ok(self.state.read().pearls.get(id).cloned())
    }

    async fn update(&self, pearl: Pearl) -> Result<()> {
        let mut state = self.state.write();
        if !state.pearls.contains_key(&pearl.id) {
            return Err(CoreError::NotFound(format!("pearl {}", pearl.id)));
        }
        state.pearls.insert(pearl.id.clone(), pearl);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Pearl>> {
        let state = self.state.read();
        let mut pearls: Vec<Pearl> =
            state.pearls.values().filter(|p| p.owner_id == owner).cloned().collect();
        pearls.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pearls)
    }

    async fn list_shareable(&self, owner: &str) -> Result<Vec<Pearl>> {
        let state = self.state.read();
        let mut pearls: Vec<Pearl> = state
            .pearls
            .values()
            .filter(|p| p.owner_id == owner && p.shareability != crate::model::Shareability::Private)
            .cloned()
            .collect();
        pearls.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pearls)
    }

    async fn record_share(&self, pearl_id: &str, to_claw: &str, _at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        state.shares.insert((pearl_id.to_string(), to_claw.to_string()));
        Ok(())
    }

    async fn was_shared_with(&self, pearl_id: &str, to_claw: &str) -> Result<bool> {
        let key = (pearl_id.to_string(), to_claw.to_string());
        Ok(self.state.read().shares.contains(&key))
    }

    async fn upsert_endorsement(&self, endorsement: Endorsement) -> Result<()> {
        let mut state = self.state.write();
        let key = (endorsement.pearl_id.clone(), endorsement.endorser_id.clone());
        state.endorsements.insert(key, endorsement);
        Ok(())
    }

    async fn list_endorsements(&self, pearl_id: &str) -> Result<Vec<Endorsement>> {
        let state = self.state.read();
        let mut found: Vec<Endorsement> = state
            .endorsements
            .values()
            .filter(|e| e.pearl_id == pearl_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.endorser_id.cmp(&b.endorser_id));
        Ok(found)
    }

    async fn record_citation(&self, pearl_id: &str) -> Result<u32> {
        let mut state = self.state.write();
        match state.pearls.get_mut(pearl_id) {
            Some(pearl) => {
                pearl.citations += 1;
                Ok(pearl.citations)
            }
            None => Err(CoreError::NotFound(format!("pearl {pearl_id}"))),
        }
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert_with_recipients(
        &self,
        message: Message,
        recipients: &[String],
    ) -> Result<Vec<InboxEntry>> {
        let mut state = self.state.write();
        if state.messages.contains_key(&message.id) {
            return Err(CoreError::Duplicate(format!("message {}", message.id)));
        }
        let mut entries = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let seq = state.seq.entry(recipient.clone()).or_insert(0);
            *seq += 1;
            let entry = InboxEntry {
                id: Uuid::new_v4().to_string(),
                recipient_id: recipient.clone(),
                message_id: message.id.clone(),
                seq: *seq,
                read: false,
                created_at: message.created_at,
            };
            state.inbox.entry(recipient.clone()).or_default().push(entry.clone());
            entries.push(entry);
        }
        state.recipients.insert(message.id.clone(), recipients.to_vec());
        state.messages.insert(message.id.clone(), message);
        Ok(entries)
    }

    async fn find(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.state.read().messages.get(id).cloned())
    }

    async fn find_thread(&self, root_id: &str) -> Result<Vec<Message>> {
        let state = self.state.read();
        let root = match state.messages.get(root_id) {
            Some(m) => m.clone(),
            None => return Ok(Vec::new()),
        };
        let thread_key = root.thread_id.clone().unwrap_or_else(|| root.id.clone());
        let mut replies: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.id != root.id && m.thread_id.as_deref() == Some(thread_key.as_str()))
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let mut thread = vec![root];
        thread.extend(replies);
        Ok(thread)
    }

    async fn is_recipient(&self, message_id: &str, claw: &str) -> Result<bool> {
        let state = self.state.read();
        Ok(state
            .recipients
            .get(message_id)
            .map(|list| list.iter().any(|r| r == claw))
            .unwrap_or(false))
    }

    async fn recipients(&self, message_id: &str) -> Result<Vec<String>> {
        Ok(self.state.read().recipients.get(message_id).cloned().unwrap_or_default())
    }

    async fn update(&self, message: Message) -> Result<()> {
        let mut state = self.state.write();
        if !state.messages.contains_key(&message.id) {
            return Err(CoreError::NotFound(format!("message {}", message.id)));
        }
        state.messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn delete(&self, message_id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.messages.remove(message_id);
        state.recipients.remove(message_id);
        for entries in state.inbox.values_mut() {
            entries.retain(|e| e.message_id != message_id);
        }
        Ok(())
    }

    async fn find_inbox_entry(
        &self,
        recipient: &str,
        message_id: &str,
    ) -> Result<Option<InboxEntry>> {
        let state = self.state.read();
        Ok(state
            .inbox
            .get(recipient)
            .and_then(|entries| entries.iter().find(|e| e.message_id == message_id))
            .cloned())
    }

    async fn list_inbox(&self, recipient: &str, limit: usize) -> Result<Vec<InboxEntry>> {
        let state = self.state.read();
        let mut entries = state.inbox.get(recipient).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn mark_read(&self, recipient: &str, message_id: &str) -> Result<()> {
        let mut state = self.state.write();
        if let Some(entries) = state.inbox.get_mut(recipient) {
            for entry in entries.iter_mut() {
                if entry.message_id == message_id {
                    entry.read = true;
                }
            }
        }
        Ok(())
    }

    async fn count_unread(&self, recipient: &str) -> Result<u64> {
        let state = self.state.read();
        Ok(state
            .inbox
            .get(recipient)
            .map(|entries| entries.iter().filter(|e| !e.read).count() as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ReactionRepository for MemoryStore {
    async fn upsert(&self, reaction: Reaction) -> Result<()> {
        let mut state = self.state.write();
        let key = (reaction.message_id.clone(), reaction.claw_id.clone());
        state.reactions.insert(key, reaction);
        Ok(())
    }

    async fn list_for_message(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let state = self.state.read();
        let mut found: Vec<Reaction> = state
            .reactions
            .values()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.claw_id.cmp(&b.claw_id));
        Ok(found)
    }
}

#[async_trait]
impl PollRepository for MemoryStore {
    async fn insert(&self, poll: Poll) -> Result<()> {
        let mut state = self.state.write();
        state.polls.insert(poll.id.clone(), poll);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Poll>> {
        Ok(self.state.read().polls.get(id).cloned())
    }

    async fn update(&self, poll: Poll) -> Result<()> {
        let mut state = self.state.write();
        if !state.polls.contains_key(&poll.id) {
            return Err(CoreError::NotFound(format!("poll {}", poll.id)));
        }
        state.polls.insert(poll.id.clone(), poll);
        Ok(())
    }

    async fn list_closing_before(&self, deadline: DateTime<Utc>) -> Result<Vec<Poll>> {
        let state = self.state.read();
        let mut found: Vec<Poll> = state
            .polls
            .values()
            .filter(|p| !p.closed && !p.closing_notified && p.closes_at <= deadline)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.closes_at.cmp(&b.closes_at));
        Ok(found)
    }
}

#[async_trait]
impl ReflexRepository for MemoryStore {
    async fn upsert(&self, reflex: Reflex) -> Result<()> {
        let mut state = self.state.write();
        let key = (reflex.owner_id.clone(), reflex.name.clone());
        match state.reflexes.get(&key) {
            Some(existing) => {
                let mut updated = reflex;
                updated.id = existing.id.clone();
                state.reflexes.insert(key, updated);
            }
            None => {
                state.reflexes.insert(key, reflex);
            }
        }
        Ok(())
    }

    async fn upsert_many(&self, reflexes: Vec<Reflex>) -> Result<()> {
        let mut state = self.state.write();
        for reflex in reflexes {
            let key = (reflex.owner_id.clone(), reflex.name.clone());
            match state.reflexes.get(&key) {
                Some(existing) => {
                    let mut updated = reflex;
                    updated.id = existing.id.clone();
                    state.reflexes.insert(key, updated);
                }
                None => {
                    state.reflexes.insert(key, reflex);
                }
            }
        }
        Ok(())
    }

    async fn find_by_name(&self, owner: &str, name: &str) -> Result<Option<Reflex>> {
        let key = (owner.to_string(), name.to_string());
        Ok(self.state.read().reflexes.get(&key).cloned())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Reflex>> {
        let state = self.state.read();
        let mut found: Vec<Reflex> =
            state.reflexes.values().filter(|r| r.owner_id == owner).cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn find_enabled(&self, owner: &str, layer: Option<u8>) -> Result<Vec<Reflex>> {
        let state = self.state.read();
        let mut found: Vec<Reflex> = state
            .reflexes
            .values()
            .filter(|r| r.owner_id == owner && r.enabled)
            .filter(|r| layer.map(|l| r.trigger_layer == l).unwrap_or(true))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn set_enabled(&self, owner: &str, name: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write();
        let key = (owner.to_string(), name.to_string());
        match state.reflexes.get_mut(&key) {
            Some(reflex) => {
                reflex.enabled = enabled;
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("reflex {name}"))),
        }
    }

    async fn owners_with_enabled(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut owners: Vec<String> = state
            .reflexes
            .values()
            .filter(|r| r.enabled)
            .map(|r| r.owner_id.clone())
            .collect();
        owners.sort();
        owners.dedup();
        Ok(owners)
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn insert(&self, execution: ReflexExecution) -> Result<()> {
        self.state.write().executions.push(execution);
        Ok(())
    }

    async fn find_recent(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReflexExecution>> {
        let state = self.state.read();
        let mut found: Vec<ReflexExecution> = state
            .executions
            .iter()
            .filter(|e| e.owner_id == owner && e.created_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn find_by_result(
        &self,
        owner: &str,
        result: ExecutionResult,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReflexExecution>> {
        let state = self.state.read();
        let mut found: Vec<ReflexExecution> = state
            .executions
            .iter()
            .filter(|e| e.owner_id == owner && e.result == result && e.created_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn count_routing_dispatches(
        &self,
        owner: &str,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let state = self.state.read();
        Ok(state
            .executions
            .iter()
            .filter(|e| {
                e.owner_id == owner
                    && e.reflex_name == ROUTE_PEARL_BY_INTEREST
                    && e.created_at >= since
                    && matches!(
                        e.result,
                        ExecutionResult::DispatchedToL1 | ExecutionResult::L1Acknowledged
                    )
                    && e.details.get("targetClawId").and_then(|v| v.as_str()) == Some(target)
            })
            .count() as u64)
    }

    async fn mark_batch(
        &self,
        batch_id: &str,
        from: ExecutionResult,
        to: ExecutionResult,
    ) -> Result<u64> {
        let mut state = self.state.write();
        let mut changed = 0u64;
        for execution in state.executions.iter_mut() {
            if execution.batch_id.as_deref() == Some(batch_id) && execution.result == from {
                execution.result = to;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl HeartbeatRepository for MemoryStore {
    async fn insert(&self, heartbeat: Heartbeat) -> Result<()> {
        self.state.write().heartbeats.push(heartbeat);
        Ok(())
    }

    async fn list_received(&self, to: &str, since: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
        let state = self.state.read();
        let mut found: Vec<Heartbeat> = state
            .heartbeats
            .iter()
            .filter(|h| h.to_claw == to && h.created_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn latest_from(&self, from: &str, to: &str) -> Result<Option<Heartbeat>> {
        let state = self.state.read();
        Ok(state
            .heartbeats
            .iter()
            .filter(|h| h.from_claw == from && h.to_claw == to)
            .max_by_key(|h| h.created_at)
            .cloned())
    }
}

#[async_trait]
impl FriendModelRepository for MemoryStore {
    async fn get(&self, observer: &str, friend: &str) -> Result<Option<FriendModel>> {
        let key = (observer.to_string(), friend.to_string());
        Ok(self.state.read().friend_models.get(&key).cloned())
    }

    async fn upsert(&self, model: FriendModel) -> Result<()> {
        let mut state = self.state.write();
        let key = (model.observer_id.clone(), model.friend_id.clone());
        state.friend_models.insert(key, model);
        Ok(())
    }
}

#[async_trait]
impl ThreadRepository for MemoryStore {
    async fn insert(&self, thread: WorkThread) -> Result<()> {
        let mut state = self.state.write();
        state.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<WorkThread>> {
        Ok(self.state.read().threads.get(id).cloned())
    }

    async fn update(&self, thread: WorkThread) -> Result<()> {
        let mut state = self.state.write();
        if !state.threads.contains_key(&thread.id) {
            return Err(CoreError::NotFound(format!("thread {}", thread.id)));
        }
        state.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn insert_contribution(&self, contribution: ThreadContribution) -> Result<()> {
        let mut state = self.state.write();
        state
            .contributions
            .entry(contribution.thread_id.clone())
            .or_default()
            .push(contribution);
        Ok(())
    }

    async fn list_contributions(&self, thread_id: &str) -> Result<Vec<ThreadContribution>> {
        let state = self.state.read();
        let mut found = state.contributions.get(thread_id).cloned().unwrap_or_default();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[async_trait]
impl CircleRepository for MemoryStore {
    async fn insert(&self, circle: Circle) -> Result<()> {
        let mut state = self.state.write();
        let key = (circle.owner_id.clone(), circle.name.clone());
        if state.circles.contains_key(&key) {
            return Err(CoreError::DuplicateName(format!("circle {}", circle.name)));
        }
        state.circles.insert(key, circle);
        Ok(())
    }

    async fn find(&self, owner: &str, name: &str) -> Result<Option<Circle>> {
        let key = (owner.to_string(), name.to_string());
        Ok(self.state.read().circles.get(&key).cloned())
    }

    async fn update(&self, circle: Circle) -> Result<()> {
        let mut state = self.state.write();
        let key = (circle.owner_id.clone(), circle.name.clone());
        if !state.circles.contains_key(&key) {
            return Err(CoreError::NotFound(format!("circle {}", circle.name)));
        }
        state.circles.insert(key, circle);
        Ok(())
    }

    async fn delete(&self, owner: &str, name: &str) -> Result<()> {
        let key = (owner.to_string(), name.to_string());
        self.state.write().circles.remove(&key);
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Circle>> {
        let state = self.state.read();
        let mut found: Vec<Circle> =
            state.circles.values().filter(|c| c.owner_id == owner).cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

#[async_trait]
impl CarapaceRepository for MemoryStore {
    async fn insert(&self, revision: CarapaceRevision) -> Result<()> {
        self.state.write().carapace.push(revision);
        Ok(())
    }

    async fn latest(&self, owner: &str) -> Result<Option<CarapaceRevision>> {
        let state = self.state.read();
        Ok(state
            .carapace
            .iter()
            .filter(|r| r.owner_id == owner)
            .max_by_key(|r| r.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Visibility;

    fn message(id: &str, sender: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            from_claw_id: sender.to_string(),
            blocks: vec![],
            visibility: Visibility::Public,
            circles: vec![],
            content_warning: None,
            reply_to_id: None,
            thread_id: None,
            edited: false,
            created_at: at,
            edited_at: None,
        }
    }

    #[tokio::test]
    async fn inbox_sequences_are_per_recipient_and_gapless() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entries =
            store.insert_with_recipients(message("m1", "alice", now), &["bob".to_string()]).await.unwrap();
        assert_eq!(entries[0].seq, 1);
        let entries = store
            .insert_with_recipients(
                message("m2", "alice", now),
                &["bob".to_string(), "carol".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(entries[0].seq, 2);
        assert_eq!(entries[1].seq, 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_inbox() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_with_recipients(message("m1", "alice", now), &["bob".to_string()]).await.unwrap();
        MessageRepository::delete(&store, "m1").await.unwrap();
        assert!(store.find_inbox_entry("bob", "m1").await.unwrap().is_none());
        assert!(MessageRepository::find(&store, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reflex_upsert_preserves_id() {
        let store = MemoryStore::new();
        let reflex = Reflex {
            id: "r1".into(),
            owner_id: "bob".into(),
            name: "keepalive_heartbeat".into(),
            value_layer: "social".into(),
            behavior: "keepalive".into(),
            trigger_layer: 0,
            trigger: crate::model::TriggerConfig::Timer { interval_ms: None },
            enabled: true,
            confidence: 1.0,
            source: crate::model::ReflexSource::Builtin,
        };
        ReflexRepository::upsert(&store, reflex.clone()).await.unwrap();
        let mut again = reflex.clone();
        again.id = "r2".into();
        ReflexRepository::upsert(&store, again).await.unwrap();
        let stored = store.find_by_name("bob", "keepalive_heartbeat").await.unwrap().unwrap();
        assert_eq!(stored.id, "r1");
    }
}
