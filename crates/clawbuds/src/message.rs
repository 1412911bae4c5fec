//! Messages: recipient resolution, sequencing, fan-out and threads.
//!
//! A send resolves its audience up front (direct list, the sender's whole
//! accepted-friend set, or a union of circles), commits the message plus
//! per-recipient inbox entries in one atomic repository operation, and only
//! then emits `message.new` per recipient. Inbox sequence numbers are
//! monotonic per recipient with no gaps.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::events::EventPayload;
use crate::ids;
use crate::model::{InboxEntry, Message, Poll, Reaction, Visibility};
use crate::storage::Storage;

/// How far ahead the closing-soon sweep looks.
const POLL_CLOSING_WINDOW_HOURS: i64 = 1;

/// Input to [`MessageService::send`].
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub blocks: Vec<serde_json::Value>,
    pub to_claw_ids: Vec<String>,
    pub circles: Vec<String>,
    pub content_warning: Option<String>,
    pub reply_to_id: Option<String>,
}

/// Message sending, viewing, editing, deletion and thread reads.
pub struct MessageService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
}

impl MessageService {
    pub fn new(storage: Storage, bus: Arc<EventBus>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock })
    }

    /// Send a message. See the module docs for the commit protocol.
    pub async fn send(
        &self,
        sender: &str,
        visibility: Visibility,
        input: SendMessage,
    ) -> Result<Message> {
        let recipients = self.resolve_recipients(sender, visibility, &input).await?;

        // Thread resolution happens before any write so an invisible parent
        // aborts the whole send.
        let (reply_to_id, thread_id) = match &input.reply_to_id {
            Some(parent_id) => {
                let parent = self
                    .storage
                    .messages
                    .find(parent_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("message {parent_id}")))?;
                if !self.can_view(sender, &parent).await? {
                    return Err(CoreError::NotFound(format!("message {parent_id}")));
                }
                let thread = parent.thread_id.clone().unwrap_or_else(|| parent.id.clone());
                (Some(parent.id), Some(thread))
            }
            None => (None, None),
        };

        let now = self.clock.now();
        let message_id = ids::message_id(now.timestamp_millis());
        let blocks = self.process_blocks(input.blocks, &message_id).await?;

        let message = Message {
            id: message_id,
            from_claw_id: sender.to_string(),
            blocks,
            visibility,
            circles: input.circles.clone(),
            content_warning: input.content_warning,
            reply_to_id,
            thread_id,
            edited: false,
            created_at: now,
            edited_at: None,
        };

        let entries =
            self.storage.messages.insert_with_recipients(message.clone(), &recipients).await?;
        debug!(message = %message.id, recipients = recipients.len(), "message committed");

        let sender_interests = self.sender_interests(sender).await;
        for entry in entries {
            self.emit_new(&message, entry, &sender_interests).await;
        }
        Ok(message)
    }

    async fn resolve_recipients(
        &self,
        sender: &str,
        visibility: Visibility,
        input: &SendMessage,
    ) -> Result<Vec<String>> {
        let mut recipients: BTreeSet<String> = BTreeSet::new();
        match visibility {
            Visibility::Direct => {
                if input.to_claw_ids.is_empty() {
                    return Err(CoreError::MissingRecipients);
                }
                for target in &input.to_claw_ids {
                    if target == sender {
                        return Err(CoreError::InvalidRecipient(
                            "sender cannot address themselves".into(),
                        ));
                    }
                    if !self.storage.friendships.are_friends(sender, target).await? {
                        return Err(CoreError::InvalidRecipient(format!(
                            "{target} is not an accepted friend"
                        )));
                    }
                    recipients.insert(target.clone());
                }
            }
            Visibility::Public => {
                recipients.extend(self.storage.friendships.list_friends(sender).await?);
            }
            Visibility::Circles => {
                if input.circles.is_empty() {
                    return Err(CoreError::MissingCircles);
                }
                for name in &input.circles {
                    let circle = self
                        .storage
                        .circles
                        .find(sender, name)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("circle {name}")))?;
                    recipients.extend(circle.members.iter().cloned());
                }
                recipients.remove(sender);
            }
        }
        Ok(recipients.into_iter().collect())
    }

    /// Create poll entities for poll blocks and inject their ids.
    async fn process_blocks(
        &self,
        blocks: Vec<serde_json::Value>,
        message_id: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let mut processed = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("poll") {
                let question = block
                    .get("question")
                    .and_then(|q| q.as_str())
                    .ok_or_else(|| CoreError::Validation("poll block requires a question".into()))?
                    .to_string();
                let options: Vec<String> = block
                    .get("options")
                    .and_then(|o| o.as_array())
                    .map(|arr| {
                        arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
                    })
                    .unwrap_or_default();
                if options.len() < 2 {
                    return Err(CoreError::Validation(
                        "poll block requires at least two options".into(),
                    ));
                }
                let closes_at = block
                    .get("closesAt")
                    .and_then(|c| c.as_str())
                    .and_then(|c| c.parse().ok())
                    .unwrap_or_else(|| self.clock.now() + Duration::hours(24));
                let poll = Poll {
                    id: Uuid::new_v4().to_string(),
                    message_id: Some(message_id.to_string()),
                    question,
                    options,
                    closes_at,
                    votes: Default::default(),
                    closing_notified: false,
                    closed: false,
                    created_at: self.clock.now(),
                };
                if let Some(obj) = block.as_object_mut() {
                    obj.insert("pollId".to_string(), serde_json::Value::String(poll.id.clone()));
                }
                self.storage.polls.insert(poll).await?;
            }
            processed.push(block);
        }
        Ok(processed)
    }

    async fn sender_interests(&self, sender: &str) -> Vec<String> {
        // Best effort: the sender's profile tags stand in for the message's
        // topical identity; tag-intersection triggers treat both sides of
        // the payload uniformly.
        match self.storage.claws.find(sender).await {
            Ok(Some(claw)) => claw.tags.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    async fn emit_new(&self, message: &Message, entry: InboxEntry, sender_interests: &[String]) {
        self.bus.emit(EventPayload::MessageNew {
            recipient_id: entry.recipient_id.clone(),
            entry,
            message: message.clone(),
            sender_interests: sender_interests.to_vec(),
            domain_tags: sender_interests.to_vec(),
        });
    }

    /// Visibility rule for viewing.
    pub async fn can_view(&self, claw: &str, message: &Message) -> Result<bool> {
        if message.from_claw_id == claw {
            return Ok(true);
        }
        match message.visibility {
            Visibility::Public => {
                self.storage.friendships.are_friends(&message.from_claw_id, claw).await
            }
            Visibility::Direct => self.storage.messages.is_recipient(&message.id, claw).await,
            Visibility::Circles => {
                for name in &message.circles {
                    if let Some(circle) =
                        self.storage.circles.find(&message.from_claw_id, name).await?
                    {
                        if circle.members.contains(claw) {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
        }
    }

    /// Fetch a message the caller is allowed to see.
    pub async fn view(&self, caller: &str, message_id: &str) -> Result<Message> {
        let message = self
            .storage
            .messages
            .find(message_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
        if !self.can_view(caller, &message).await? {
            return Err(CoreError::NotFound(format!("message {message_id}")));
        }
        Ok(message)
    }

    /// Edit message content. Sender only.
    pub async fn edit(
        &self,
        caller: &str,
        message_id: &str,
        blocks: Vec<serde_json::Value>,
        content_warning: Option<String>,
    ) -> Result<Message> {
        let mut message = self
            .storage
            .messages
            .find(message_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
        if message.from_claw_id != caller {
            return Err(CoreError::Forbidden("only the sender may edit".into()));
        }
        message.blocks = blocks;
        message.content_warning = content_warning;
        message.edited = true;
        message.edited_at = Some(self.clock.now());
        self.storage.messages.update(message.clone()).await?;

        for recipient in self.storage.messages.recipients(message_id).await? {
            self.bus.emit(EventPayload::MessageEdited {
                recipient_id: recipient,
                message_id: message_id.to_string(),
            });
        }
        Ok(message)
    }

    /// Delete a message, cascading to recipient rows and inbox entries.
    pub async fn delete(&self, caller: &str, message_id: &str) -> Result<()> {
        let message = self
            .storage
            .messages
            .find(message_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
        if message.from_claw_id != caller {
            return Err(CoreError::Forbidden("only the sender may delete".into()));
        }
        let recipients = self.storage.messages.recipients(message_id).await?;
        self.storage.messages.delete(message_id).await?;
        for recipient in recipients {
            self.bus.emit(EventPayload::MessageDeleted {
                recipient_id: recipient,
                message_id: message_id.to_string(),
            });
        }
        Ok(())
    }

    /// Root message followed by all replies sharing its thread, in creation
    /// order. The caller must be able to view the root.
    pub async fn thread(&self, caller: &str, root_id: &str) -> Result<Vec<Message>> {
        let root = self.view(caller, root_id).await?;
        self.storage.messages.find_thread(&root.id).await
    }

    /// Newest-first inbox page.
    pub async fn inbox(&self, recipient: &str, limit: usize) -> Result<Vec<InboxEntry>> {
        self.storage.messages.list_inbox(recipient, limit).await
    }

    pub async fn mark_read(&self, recipient: &str, message_id: &str) -> Result<()> {
        self.storage.messages.mark_read(recipient, message_id).await
    }

    pub async fn count_unread(&self, recipient: &str) -> Result<u64> {
        self.storage.messages.count_unread(recipient).await
    }
}

/// Emoji reactions on messages.
pub struct ReactionService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
    messages: Arc<MessageService>,
}

impl ReactionService {
    pub fn new(
        storage: Storage,
        bus: Arc<EventBus>,
        clock: SharedClock,
        messages: Arc<MessageService>,
    ) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock, messages })
    }

    /// Add (or replace) the caller's reaction on a message they can view.
    pub async fn add(&self, caller: &str, message_id: &str, emoji: &str) -> Result<()> {
        let message = self.messages.view(caller, message_id).await?;
        self.storage
            .reactions
            .upsert(Reaction {
                message_id: message_id.to_string(),
                claw_id: caller.to_string(),
                emoji: emoji.to_string(),
                created_at: self.clock.now(),
            })
            .await?;
        self.bus.emit(EventPayload::ReactionAdded {
            message_id: message_id.to_string(),
            recipient_id: message.from_claw_id,
            reactor_id: caller.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    pub async fn list(&self, message_id: &str) -> Result<Vec<Reaction>> {
        self.storage.reactions.list_for_message(message_id).await
    }
}

/// Poll voting, closing and the closing-soon sweep.
pub struct PollService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
    messages: Arc<MessageService>,
}

impl PollService {
    pub fn new(
        storage: Storage,
        bus: Arc<EventBus>,
        clock: SharedClock,
        messages: Arc<MessageService>,
    ) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock, messages })
    }

    /// Record the caller's vote. One vote per claw; later votes replace.
    pub async fn vote(&self, caller: &str, poll_id: &str, option: usize) -> Result<Poll> {
        let mut poll = self.load(poll_id).await?;
        if poll.closed || poll.closes_at <= self.clock.now() {
            return Err(CoreError::Validation("poll is closed".into()));
        }
        if option >= poll.options.len() {
            return Err(CoreError::Validation(format!("option {option} out of range")));
        }
        if let Some(message_id) = &poll.message_id {
            // Voting requires visibility of the carrying message.
            self.messages.view(caller, message_id).await?;
        }
        poll.votes.insert(caller.to_string(), option);
        self.storage.polls.update(poll.clone()).await?;
        Ok(poll)
    }

    /// Close a poll. Only the sender of the carrying message may close it
    /// early.
    pub async fn close(&self, caller: &str, poll_id: &str) -> Result<Poll> {
        let mut poll = self.load(poll_id).await?;
        if let Some(message_id) = &poll.message_id {
            let message = self
                .storage
                .messages
                .find(message_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("message {message_id}")))?;
            if message.from_claw_id != caller {
                return Err(CoreError::Forbidden("only the poll owner may close it".into()));
            }
        }
        poll.closed = true;
        self.storage.polls.update(poll.clone()).await?;
        Ok(poll)
    }

    /// Emit `poll.closing_soon` once per poll entering the closing window.
    pub async fn sweep_closing(&self) -> Result<u32> {
        let deadline = self.clock.now() + Duration::hours(POLL_CLOSING_WINDOW_HOURS);
        let mut flagged = 0u32;
        for mut poll in self.storage.polls.list_closing_before(deadline).await? {
            poll.closing_notified = true;
            self.storage.polls.update(poll.clone()).await?;
            let Some(message_id) = poll.message_id.clone() else { continue };
            let Some(message) = self.storage.messages.find(&message_id).await? else { continue };
            self.bus.emit(EventPayload::PollClosingSoon {
                poll_id: poll.id.clone(),
                message_id,
                owner_id: message.from_claw_id,
                closes_at: poll.closes_at,
            });
            flagged += 1;
        }
        Ok(flagged)
    }

    async fn load(&self, id: &str) -> Result<Poll> {
        self.storage
            .polls
            .find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("poll {id}")))
    }
}

/// Timer ticks drive the closing-soon sweep.
#[async_trait::async_trait]
impl crate::bus::EventHandler for PollService {
    fn name(&self) -> &'static str {
        "polls"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()> {
        if matches!(event, EventPayload::TimerTick { .. }) {
            self.sweep_closing().await?;
        }
        Ok(())
    }
}
