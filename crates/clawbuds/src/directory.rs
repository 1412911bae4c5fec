//! Claw accounts.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::ids;
use crate::model::{Claw, ClawStatus};
use crate::storage::Storage;

/// Registration and profile management.
pub struct ClawService {
    storage: Storage,
    clock: SharedClock,
}

impl ClawService {
    pub fn new(storage: Storage, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self { storage, clock })
    }

    /// Register a new claw. The id is derived from the public key, so a
    /// re-registration of the same key fails with `DUPLICATE`.
    pub async fn register(
        &self,
        public_key: &[u8],
        display_name: &str,
        bio: &str,
        tags: BTreeSet<String>,
        discoverable: bool,
    ) -> Result<Claw> {
        if display_name.trim().is_empty() {
            return Err(CoreError::Validation("display name must not be empty".into()));
        }
        let now = self.clock.now();
        let claw = Claw {
            id: ids::claw_id(public_key),
            public_key: hex::encode(public_key),
            display_name: display_name.to_string(),
            bio: bio.to_string(),
            tags,
            status: ClawStatus::Active,
            discoverable,
            last_seen_at: now,
            created_at: now,
        };
        self.storage.claws.insert(claw.clone()).await?;
        Ok(claw)
    }

    pub async fn find(&self, id: &str) -> Result<Claw> {
        self.storage
            .claws
            .find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("claw {id}")))
    }

    /// Update profile fields. Only the claw itself may do this.
    pub async fn update_profile(
        &self,
        caller: &str,
        id: &str,
        display_name: Option<String>,
        bio: Option<String>,
        tags: Option<BTreeSet<String>>,
        discoverable: Option<bool>,
    ) -> Result<Claw> {
        if caller != id {
            return Err(CoreError::Forbidden("cannot edit another claw's profile".into()));
        }
        let mut claw = self.find(id).await?;
        if let Some(name) = display_name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation("display name must not be empty".into()));
            }
            claw.display_name = name;
        }
        if let Some(bio) = bio {
            claw.bio = bio;
        }
        if let Some(tags) = tags {
            claw.tags = tags;
        }
        if let Some(discoverable) = discoverable {
            claw.discoverable = discoverable;
        }
        self.storage.claws.update(claw.clone()).await?;
        Ok(claw)
    }

    pub async fn touch_last_seen(&self, id: &str) -> Result<()> {
        self.storage.claws.update_last_seen(id, self.clock.now()).await
    }

    /// Discoverable claws carrying the tag.
    pub async fn search_by_tag(&self, tag: &str) -> Result<Vec<Claw>> {
        self.storage.claws.search_by_tag(tag).await
    }

    pub async fn set_status(&self, id: &str, status: ClawStatus) -> Result<Claw> {
        let mut claw = self.find(id).await?;
        claw.status = status;
        self.storage.claws.update(claw.clone()).await?;
        Ok(claw)
    }
}
