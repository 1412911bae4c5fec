//! Static topic registry and event payloads.
//!
//! Topics form a closed sum type so the dispatcher is never keyed by bare
//! strings, and every topic carries a compiler-checked payload shape. The
//! reflex engine consumes events through the canonical [`BusEvent`] view,
//! whose `claw_id` identifies the claw whose reflexes the event concerns.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{DunbarLayer, Heartbeat, InboxEntry, Message, Pearl};

/// Every topic the in-process bus carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    MessageNew,
    MessageEdited,
    MessageDeleted,
    ReactionAdded,
    HeartbeatReceived,
    RelationshipLayerChanged,
    FriendAccepted,
    FriendRemoved,
    PearlCreated,
    PearlShared,
    PearlEndorsed,
    TimerTick,
    PollClosingSoon,
    ThreadContributionAdded,
    /// Synthetic topic emitted after every reflex execution is audit-logged.
    ReflexExecution,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::MessageNew => "message.new",
            Topic::MessageEdited => "message.edited",
            Topic::MessageDeleted => "message.deleted",
            Topic::ReactionAdded => "reaction.added",
            Topic::HeartbeatReceived => "heartbeat.received",
            Topic::RelationshipLayerChanged => "relationship.layer_changed",
            Topic::FriendAccepted => "friend.accepted",
            Topic::FriendRemoved => "friend.removed",
            Topic::PearlCreated => "pearl.created",
            Topic::PearlShared => "pearl.shared",
            Topic::PearlEndorsed => "pearl.endorsed",
            Topic::TimerTick => "timer.tick",
            Topic::PollClosingSoon => "poll.closing_soon",
            Topic::ThreadContributionAdded => "thread.contribution_added",
            Topic::ReflexExecution => "__reflex_execution__",
        }
    }
}

/// Typed payload for each topic.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    MessageNew {
        recipient_id: String,
        entry: InboxEntry,
        message: Message,
        /// Interests the sender declared in their latest heartbeat to the
        /// recipient; lets tag-intersection triggers match without a lookup.
        sender_interests: Vec<String>,
        domain_tags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited { recipient_id: String, message_id: String },
    #[serde(rename_all = "camelCase")]
    MessageDeleted { recipient_id: String, message_id: String },
    #[serde(rename_all = "camelCase")]
    ReactionAdded {
        message_id: String,
        /// Author of the message that was reacted to.
        recipient_id: String,
        reactor_id: String,
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    HeartbeatReceived { heartbeat: Heartbeat },
    #[serde(rename_all = "camelCase")]
    RelationshipLayerChanged {
        from_claw: String,
        to_claw: String,
        old_layer: DunbarLayer,
        new_layer: DunbarLayer,
        strength: f64,
    },
    #[serde(rename_all = "camelCase")]
    FriendAccepted { requester_id: String, accepter_id: String },
    #[serde(rename_all = "camelCase")]
    FriendRemoved { claw_id: String, friend_id: String },
    #[serde(rename_all = "camelCase")]
    PearlCreated { pearl: Pearl },
    #[serde(rename_all = "camelCase")]
    PearlShared { pearl_id: String, owner_id: String, to_claw: String, domain_tags: Vec<String> },
    #[serde(rename_all = "camelCase")]
    PearlEndorsed { pearl_id: String, owner_id: String, endorser_id: String, score: f64 },
    #[serde(rename_all = "camelCase")]
    TimerTick { interval_ms: u64, at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    PollClosingSoon {
        poll_id: String,
        message_id: String,
        owner_id: String,
        closes_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ThreadContributionAdded {
        thread_id: String,
        contributor_id: String,
        participant_count: usize,
        contribution_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    ReflexExecution {
        owner_id: String,
        reflex_name: String,
        behavior: String,
        result: String,
    },
}

impl EventPayload {
    /// Topic this payload belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::MessageNew { .. } => Topic::MessageNew,
            EventPayload::MessageEdited { .. } => Topic::MessageEdited,
            EventPayload::MessageDeleted { .. } => Topic::MessageDeleted,
            EventPayload::ReactionAdded { .. } => Topic::ReactionAdded,
            EventPayload::HeartbeatReceived { .. } => Topic::HeartbeatReceived,
            EventPayload::RelationshipLayerChanged { .. } => Topic::RelationshipLayerChanged,
            EventPayload::FriendAccepted { .. } => Topic::FriendAccepted,
            EventPayload::FriendRemoved { .. } => Topic::FriendRemoved,
            EventPayload::PearlCreated { .. } => Topic::PearlCreated,
            EventPayload::PearlShared { .. } => Topic::PearlShared,
            EventPayload::PearlEndorsed { .. } => Topic::PearlEndorsed,
            EventPayload::TimerTick { .. } => Topic::TimerTick,
            EventPayload::PollClosingSoon { .. } => Topic::PollClosingSoon,
            EventPayload::ThreadContributionAdded { .. } => Topic::ThreadContributionAdded,
            EventPayload::ReflexExecution { .. } => Topic::ReflexExecution,
        }
    }

    /// The claw whose reflexes this event concerns.
    ///
    /// Extraction precedence per topic: contributor over direct claw field
    /// over recipient over owner over the edge's far end.
    pub fn subject_claw(&self) -> &str {
        match self {
            EventPayload::ThreadContributionAdded { contributor_id, .. } => contributor_id,
            EventPayload::FriendRemoved { claw_id, .. } => claw_id,
            EventPayload::ReflexExecution { owner_id, .. } => owner_id,
            EventPayload::MessageNew { recipient_id, .. }
            | EventPayload::MessageEdited { recipient_id, .. }
            | EventPayload::MessageDeleted { recipient_id, .. }
            | EventPayload::ReactionAdded { recipient_id, .. } => recipient_id,
            EventPayload::HeartbeatReceived { heartbeat } => &heartbeat.to_claw,
            EventPayload::RelationshipLayerChanged { from_claw, .. } => from_claw,
            EventPayload::FriendAccepted { accepter_id, .. } => accepter_id,
            EventPayload::PearlCreated { pearl } => &pearl.owner_id,
            EventPayload::PearlShared { owner_id, .. } => owner_id,
            EventPayload::PearlEndorsed { owner_id, .. } => owner_id,
            EventPayload::PollClosingSoon { owner_id, .. } => owner_id,
            // Timer ticks address every claw; the engine fans out itself.
            EventPayload::TimerTick { .. } => "",
        }
    }

    /// Canonical view consumed by trigger evaluation.
    pub fn to_bus_event(&self) -> BusEvent {
        BusEvent {
            event_type: self.topic().as_str().to_string(),
            claw_id: self.subject_claw().to_string(),
            data: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Canonicalized event as seen by reflex triggers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub event_type: String,
    pub claw_id: String,
    /// Flattened payload fields (camelCase keys).
    pub data: serde_json::Value,
}

impl BusEvent {
    /// Numeric field lookup used by threshold and counter triggers.
    pub fn number_field(&self, field: &str) -> Option<f64> {
        self.data.get(field).and_then(|v| v.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_wire_names() {
        assert_eq!(Topic::MessageNew.as_str(), "message.new");
        assert_eq!(Topic::RelationshipLayerChanged.as_str(), "relationship.layer_changed");
        assert_eq!(Topic::ReflexExecution.as_str(), "__reflex_execution__");
    }

    #[test]
    fn layer_changed_canonicalizes_from_claw() {
        let payload = EventPayload::RelationshipLayerChanged {
            from_claw: "alice".into(),
            to_claw: "bob".into(),
            old_layer: DunbarLayer::Sympathy,
            new_layer: DunbarLayer::Active,
            strength: 0.4,
        };
        let event = payload.to_bus_event();
        assert_eq!(event.event_type, "relationship.layer_changed");
        assert_eq!(event.claw_id, "alice");
        assert_eq!(event.data["oldLayer"], "sympathy");
        assert_eq!(event.number_field("strength"), Some(0.4));
    }

    #[test]
    fn heartbeat_canonicalizes_recipient() {
        let payload = EventPayload::HeartbeatReceived {
            heartbeat: Heartbeat {
                id: "hb".into(),
                from_claw: "friend".into(),
                to_claw: "owner".into(),
                status: "researching".into(),
                interests: vec!["ai".into()],
                created_at: Utc::now(),
            },
        };
        assert_eq!(payload.subject_claw(), "owner");
    }
}
