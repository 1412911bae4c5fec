//! Encrypted collaborative workspaces.
//!
//! A work thread is a participant-gated space whose contributions are
//! ciphertext to the core; each participant holds their own encrypted copy
//! of the workspace key. The core enforces membership and lifecycle and
//! emits `thread.contribution_added` for the reflex layer.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::events::EventPayload;
use crate::model::{ThreadContribution, ThreadParticipant, WorkThread, WorkThreadStatus};
use crate::storage::Storage;

/// Workspace creation, membership and contributions.
pub struct ThreadService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
}

impl ThreadService {
    pub fn new(storage: Storage, bus: Arc<EventBus>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock })
    }

    /// Create a workspace. The creator supplies one encrypted key blob per
    /// initial participant, themselves included.
    pub async fn create(
        &self,
        creator: &str,
        purpose: &str,
        title: &str,
        participants: Vec<ThreadParticipant>,
    ) -> Result<WorkThread> {
        if !participants.iter().any(|p| p.claw_id == creator) {
            return Err(CoreError::Validation("creator must be a participant".into()));
        }
        for participant in &participants {
            if participant.claw_id != creator
                && !self.storage.friendships.are_friends(creator, &participant.claw_id).await?
            {
                return Err(CoreError::NotFriends(format!(
                    "{} is not an accepted friend",
                    participant.claw_id
                )));
            }
        }
        let thread = WorkThread {
            id: Uuid::new_v4().to_string(),
            creator_id: creator.to_string(),
            purpose: purpose.to_string(),
            title: title.to_string(),
            status: WorkThreadStatus::Active,
            participants,
            created_at: self.clock.now(),
        };
        self.storage.threads.insert(thread.clone()).await?;
        Ok(thread)
    }

    pub async fn find(&self, caller: &str, id: &str) -> Result<WorkThread> {
        let thread = self.load(id).await?;
        if !thread.is_participant(caller) {
            return Err(CoreError::NotFound(format!("thread {id}")));
        }
        Ok(thread)
    }

    /// Add a participant with their encrypted key. Creator only.
    pub async fn add_participant(
        &self,
        caller: &str,
        thread_id: &str,
        participant: ThreadParticipant,
    ) -> Result<WorkThread> {
        let mut thread = self.load(thread_id).await?;
        if thread.creator_id != caller {
            return Err(CoreError::Forbidden("only the creator may add participants".into()));
        }
        if thread.is_participant(&participant.claw_id) {
            return Err(CoreError::Duplicate(format!(
                "{} already participates",
                participant.claw_id
            )));
        }
        thread.participants.push(participant);
        self.storage.threads.update(thread.clone()).await?;
        Ok(thread)
    }

    /// Append a contribution. Participants only.
    pub async fn contribute(
        &self,
        caller: &str,
        thread_id: &str,
        body: serde_json::Value,
    ) -> Result<ThreadContribution> {
        let thread = self.load(thread_id).await?;
        if !thread.is_participant(caller) {
            return Err(CoreError::Forbidden("not a participant".into()));
        }
        if thread.status != WorkThreadStatus::Active {
            return Err(CoreError::Validation("thread is not active".into()));
        }
        let contribution = ThreadContribution {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            contributor_id: caller.to_string(),
            body,
            created_at: self.clock.now(),
        };
        self.storage.threads.insert_contribution(contribution.clone()).await?;
        let contribution_count = self.storage.threads.list_contributions(thread_id).await?.len();
        debug!(thread = thread_id, contributor = caller, "contribution added");
        self.bus.emit(EventPayload::ThreadContributionAdded {
            thread_id: thread_id.to_string(),
            contributor_id: caller.to_string(),
            participant_count: thread.participants.len(),
            contribution_count,
        });
        Ok(contribution)
    }

    /// Move the workspace through its lifecycle. Creator only.
    pub async fn set_status(
        &self,
        caller: &str,
        thread_id: &str,
        status: WorkThreadStatus,
    ) -> Result<WorkThread> {
        let mut thread = self.load(thread_id).await?;
        if thread.creator_id != caller {
            return Err(CoreError::Forbidden("only the creator may change status".into()));
        }
        thread.status = status;
        self.storage.threads.update(thread.clone()).await?;
        Ok(thread)
    }

    pub async fn contributions(&self, caller: &str, thread_id: &str) -> Result<Vec<ThreadContribution>> {
        let thread = self.load(thread_id).await?;
        if !thread.is_participant(caller) {
            return Err(CoreError::Forbidden("not a participant".into()));
        }
        self.storage.threads.list_contributions(thread_id).await
    }

    async fn load(&self, id: &str) -> Result<WorkThread> {
        self.storage
            .threads
            .find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("thread {id}")))
    }
}
