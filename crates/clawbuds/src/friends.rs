//! Friendships and circles.
//!
//! Friendship is an undirected edge with a small state machine; at most one
//! non-rejected record exists per unordered pair. Accepting emits
//! `friend.accepted`, removal emits `friend.removed`; downstream services
//! own the cascades (strength rows, trust rows).

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::events::EventPayload;
use crate::model::{Circle, Friendship, FriendshipStatus};
use crate::storage::Storage;

/// Circles a single claw may own.
pub const MAX_CIRCLES_PER_CLAW: usize = 32;
/// Members a single circle may hold.
pub const MAX_MEMBERS_PER_CIRCLE: usize = 256;

/// Friendship lifecycle.
pub struct FriendshipService {
    storage: Storage,
    bus: Arc<EventBus>,
    clock: SharedClock,
}

impl FriendshipService {
    pub fn new(storage: Storage, bus: Arc<EventBus>, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, bus, clock })
    }

    /// Send a friend request from `requester` to `accepter`.
    pub async fn send_request(&self, requester: &str, accepter: &str) -> Result<Friendship> {
        if requester == accepter {
            return Err(CoreError::Validation("cannot befriend yourself".into()));
        }
        if self.storage.claws.find(accepter).await?.is_none() {
            return Err(CoreError::NotFound(format!("claw {accepter}")));
        }
        if let Some(existing) = self.storage.friendships.find_by_pair(requester, accepter).await? {
            return match existing.status {
                FriendshipStatus::Blocked => {
                    Err(CoreError::Forbidden("pair is blocked".into()))
                }
                _ => Err(CoreError::Duplicate("friendship already exists".into())),
            };
        }
        let friendship = Friendship {
            id: Uuid::new_v4().to_string(),
            requester_id: requester.to_string(),
            accepter_id: accepter.to_string(),
            status: FriendshipStatus::Pending,
            created_at: self.clock.now(),
            accepted_at: None,
        };
        self.storage.friendships.insert(friendship.clone()).await?;
        Ok(friendship)
    }

    /// Accept a pending request. Only the addressed claw may accept.
    pub async fn accept(&self, caller: &str, friendship_id: &str) -> Result<Friendship> {
        let mut friendship = self.load(friendship_id).await?;
        if friendship.accepter_id != caller {
            return Err(CoreError::Forbidden("only the addressee may accept".into()));
        }
        if friendship.status != FriendshipStatus::Pending {
            return Err(CoreError::Validation("request is not pending".into()));
        }
        friendship.status = FriendshipStatus::Accepted;
        friendship.accepted_at = Some(self.clock.now());
        self.storage.friendships.update(friendship.clone()).await?;
        debug!(requester = %friendship.requester_id, accepter = %friendship.accepter_id, "friendship accepted");
        self.bus.emit(EventPayload::FriendAccepted {
            requester_id: friendship.requester_id.clone(),
            accepter_id: friendship.accepter_id.clone(),
        });
        Ok(friendship)
    }

    /// Reject a pending request.
    pub async fn reject(&self, caller: &str, friendship_id: &str) -> Result<Friendship> {
        let mut friendship = self.load(friendship_id).await?;
        if friendship.accepter_id != caller {
            return Err(CoreError::Forbidden("only the addressee may reject".into()));
        }
        if friendship.status != FriendshipStatus::Pending {
            return Err(CoreError::Validation("request is not pending".into()));
        }
        friendship.status = FriendshipStatus::Rejected;
        self.storage.friendships.update(friendship.clone()).await?;
        Ok(friendship)
    }

    /// Block the other claw of the pair, severing an accepted friendship.
    pub async fn block(&self, caller: &str, other: &str) -> Result<Friendship> {
        match self.storage.friendships.find_by_pair(caller, other).await? {
            Some(mut friendship) => {
                let was_accepted = friendship.status == FriendshipStatus::Accepted;
                friendship.status = FriendshipStatus::Blocked;
                self.storage.friendships.update(friendship.clone()).await?;
                if was_accepted {
                    self.emit_removed(caller, other);
                }
                Ok(friendship)
            }
            None => {
                let friendship = Friendship {
                    id: Uuid::new_v4().to_string(),
                    requester_id: caller.to_string(),
                    accepter_id: other.to_string(),
                    status: FriendshipStatus::Blocked,
                    created_at: self.clock.now(),
                    accepted_at: None,
                };
                self.storage.friendships.insert(friendship.clone()).await?;
                Ok(friendship)
            }
        }
    }

    /// Remove an accepted friendship. Either end may remove.
    pub async fn remove(&self, caller: &str, other: &str) -> Result<()> {
        let friendship = self
            .storage
            .friendships
            .find_by_pair(caller, other)
            .await?
            .ok_or_else(|| CoreError::NotFound("friendship".into()))?;
        if friendship.other(caller).is_none() {
            return Err(CoreError::Forbidden("not part of this friendship".into()));
        }
        self.storage.friendships.delete(&friendship.id).await?;
        self.emit_removed(caller, other);
        Ok(())
    }

    fn emit_removed(&self, claw: &str, friend: &str) {
        self.bus.emit(EventPayload::FriendRemoved {
            claw_id: claw.to_string(),
            friend_id: friend.to_string(),
        });
    }

    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        self.storage.friendships.are_friends(a, b).await
    }

    pub async fn list_friends(&self, claw: &str) -> Result<Vec<String>> {
        self.storage.friendships.list_friends(claw).await
    }

    async fn load(&self, id: &str) -> Result<Friendship> {
        self.storage
            .friendships
            .find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("friendship {id}")))
    }
}

/// Circle management. Members must be accepted friends of the owner.
pub struct CircleService {
    storage: Storage,
    clock: SharedClock,
}

impl CircleService {
    pub fn new(storage: Storage, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, clock })
    }

    pub async fn create(&self, owner: &str, name: &str) -> Result<Circle> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation("circle name must not be empty".into()));
        }
        let existing = self.storage.circles.list(owner).await?;
        if existing.len() >= MAX_CIRCLES_PER_CLAW {
            return Err(CoreError::LimitExceeded(format!(
                "at most {MAX_CIRCLES_PER_CLAW} circles per claw"
            )));
        }
        if existing.iter().any(|c| c.name == name) {
            return Err(CoreError::DuplicateName(format!("circle {name}")));
        }
        let circle = Circle {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.to_string(),
            name: name.to_string(),
            members: Default::default(),
            created_at: self.clock.now(),
        };
        self.storage.circles.insert(circle.clone()).await?;
        Ok(circle)
    }

    pub async fn delete(&self, owner: &str, name: &str) -> Result<()> {
        self.storage.circles.delete(owner, name).await
    }

    pub async fn add_member(&self, owner: &str, name: &str, member: &str) -> Result<Circle> {
        if !self.storage.friendships.are_friends(owner, member).await? {
            return Err(CoreError::NotFriends(format!("{member} is not an accepted friend")));
        }
        let mut circle = self.load(owner, name).await?;
        if circle.members.len() >= MAX_MEMBERS_PER_CIRCLE {
            return Err(CoreError::LimitExceeded(format!(
                "at most {MAX_MEMBERS_PER_CIRCLE} members per circle"
            )));
        }
        circle.members.insert(member.to_string());
        self.storage.circles.update(circle.clone()).await?;
        Ok(circle)
    }

    pub async fn remove_member(&self, owner: &str, name: &str, member: &str) -> Result<Circle> {
        let mut circle = self.load(owner, name).await?;
        circle.members.remove(member);
        self.storage.circles.update(circle.clone()).await?;
        Ok(circle)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Circle>> {
        self.storage.circles.list(owner).await
    }

    async fn load(&self, owner: &str, name: &str) -> Result<Circle> {
        self.storage
            .circles
            .find(owner, name)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("circle {name}")))
    }
}
