//! Persisted entities of the ClawBuds core.
//!
//! Every entity carries an opaque string identity. Timestamps are UTC with
//! millisecond precision and serialize as ISO-8601. Opaque payloads (message
//! blocks, pearl bodies, execution details) are carried as JSON values; the
//! core never inspects their content.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel domain used when no domain-specific trust record exists.
pub const OVERALL_DOMAIN: &str = "_overall";

// ============================================================================
// Claws and friendships
// ============================================================================

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClawStatus {
    Active,
    Suspended,
}

/// A user/agent identity.
///
/// The id is derived deterministically from the public verification key;
/// no two claws share an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claw {
    pub id: String,
    /// Hex-encoded public verification key.
    pub public_key: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub status: ClawStatus,
    pub discoverable: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Friendship state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
    Blocked,
}

/// Undirected edge between two claws.
///
/// At most one non-rejected record exists per unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: String,
    pub requester_id: String,
    pub accepter_id: String,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Friendship {
    /// The other end of the edge, if `claw` is one of the two.
    pub fn other(&self, claw: &str) -> Option<&str> {
        if self.requester_id == claw {
            Some(&self.accepter_id)
        } else if self.accepter_id == claw {
            Some(&self.requester_id)
        } else {
            None
        }
    }
}

/// Named friend grouping owned by a claw. Unique per (owner, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circle {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Relationship strength
// ============================================================================

/// One of the four bands of relationship strength, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunbarLayer {
    Core,
    Sympathy,
    Active,
    Casual,
}

impl DunbarLayer {
    /// Rank for ordering comparisons: core > sympathy > active > casual.
    pub fn rank(self) -> u8 {
        match self {
            DunbarLayer::Core => 3,
            DunbarLayer::Sympathy => 2,
            DunbarLayer::Active => 1,
            DunbarLayer::Casual => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DunbarLayer::Core => "core",
            DunbarLayer::Sympathy => "sympathy",
            DunbarLayer::Active => "active",
            DunbarLayer::Casual => "casual",
        }
    }
}

/// Directed per-pair strength scalar in [0, 1].
///
/// The stored value is always the result of applying all boosts and decays
/// up to `last_boost_at`; readers apply the remaining decay lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipStrength {
    pub from_claw: String,
    pub to_claw: String,
    pub strength: f64,
    pub last_boost_at: DateTime<Utc>,
    pub layer: DunbarLayer,
}

// ============================================================================
// Trust
// ============================================================================

/// Per-pair, per-domain five-dimensional trust record.
///
/// `composite` always equals the composition rule applied to the stored
/// Q/H/N/W values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScore {
    pub from_claw: String,
    pub to_claw: String,
    pub domain: String,
    /// Agent-observed interaction quality.
    pub q: f64,
    /// Human endorsement; `None` until a human has weighed in.
    pub h: Option<f64>,
    /// Network position.
    pub n: f64,
    /// Witness chain.
    pub w: f64,
    pub composite: f64,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Pearls
// ============================================================================

/// Who may see a pearl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shareability {
    Private,
    FriendsOnly,
    Public,
}

/// How a pearl came to exist on this claw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PearlOrigin {
    Manual,
    Routed,
}

/// Optional gates evaluated when a pearl is shared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareConditions {
    /// Minimum composite trust in the pearl's primary domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_threshold: Option<f64>,
    /// Require the primary domain tags to intersect the recipient's interests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_match: Option<bool>,
}

/// Owner-scoped cognitive artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pearl {
    pub id: String,
    pub owner_id: String,
    /// Artifact type tag (insight, recipe, heuristic, ...). Opaque to the core.
    pub kind: String,
    /// Trigger text describing when the artifact applies.
    pub trigger: String,
    /// Ordered domain tags; the first tag is primary.
    pub domain_tags: Vec<String>,
    /// Opaque body.
    pub body: serde_json::Value,
    /// Trust-weighted endorsement quality in [0.1, 1.0].
    pub luster: f64,
    pub shareability: Shareability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_conditions: Option<ShareConditions>,
    pub origin: PearlOrigin,
    /// Number of times other artifacts cite this pearl.
    pub citations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pearl {
    /// Primary domain tag, falling back to the overall sentinel.
    pub fn primary_domain(&self) -> &str {
        self.domain_tags.first().map(String::as_str).unwrap_or(OVERALL_DOMAIN)
    }
}

/// Endorsement of a pearl by another claw. At most one per (pearl, endorser).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endorsement {
    pub pearl_id: String,
    pub endorser_id: String,
    /// Endorsement quality in [0, 1].
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Messages
// ============================================================================

/// Message audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Direct,
    Public,
    Circles,
}

/// Immutable record of a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Time-ordered id; see [`crate::ids::message_id`].
    pub id: String,
    pub from_claw_id: String,
    /// Opaque ordered content blocks.
    pub blocks: Vec<serde_json::Value>,
    pub visibility: Visibility,
    /// Circle names, only meaningful for `circles` visibility.
    #[serde(default)]
    pub circles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Root of the reply chain; equals the parent's thread id or, when the
    /// parent has none, the parent's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// Inbox placement of a message for one recipient.
///
/// `seq` is monotonic per recipient, starting at 1, with no gaps within a
/// recipient's commit series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub id: String,
    pub recipient_id: String,
    pub message_id: String,
    pub seq: u64,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-message emoji reaction. Upsert per (message, claw).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: String,
    pub claw_id: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A poll attached to a message at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    /// Backfilled once the containing message commits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub question: String,
    pub options: Vec<String>,
    pub closes_at: DateTime<Utc>,
    /// Voter claw id to chosen option index.
    #[serde(default)]
    pub votes: BTreeMap<String, usize>,
    /// Set once the closing-soon sweep has flagged this poll.
    #[serde(default)]
    pub closing_notified: bool,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Reflexes
// ============================================================================

/// Where a reflex definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflexSource {
    Builtin,
    Learned,
    User,
}

/// Comparison operators for threshold triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Comparison operators for counter triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterOp {
    Gt,
    Gte,
}

/// Declarative trigger condition, persisted with the reflex.
///
/// Match evaluation is a pure function of (reflex, event); see
/// [`crate::reflex::triggers`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Match by event type; the optional `downgrade` condition additionally
    /// requires `oldLayer > newLayer` in Dunbar layer order.
    EventType {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    /// Match `timer.tick`, optionally pinned to one interval.
    Timer {
        #[serde(default, rename = "intervalMs", skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
    /// Match by type and require a minimum overlap between the payload's
    /// domain tags and the sender's declared interests.
    EventTypeWithTagIntersection {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default = "default_min_common_tags", rename = "minCommonTags")]
        min_common_tags: usize,
    },
    /// Compare a numeric payload field against a bound.
    Threshold {
        #[serde(rename = "eventType")]
        event_type: String,
        field: String,
        op: ThresholdOp,
        value: f64,
    },
    /// Compare an integer payload field against a bound.
    Counter {
        #[serde(rename = "eventType")]
        event_type: String,
        field: String,
        op: CounterOp,
        value: i64,
    },
    /// Match by type and require `closesAt` to be in the future but within
    /// `withinMs` of now.
    Deadline {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(rename = "withinMs")]
        within_ms: u64,
    },
    /// Match the synthetic `__reflex_execution__` event.
    AnyReflexExecution,
    /// Layer-1 predicate evaluated by the external cognitive host, never by
    /// the Layer-0 matcher.
    MultiHeartbeat {
        #[serde(default, rename = "windowMs", skip_serializing_if = "Option::is_none")]
        window_ms: Option<u64>,
    },
}

fn default_min_common_tags() -> usize {
    1
}

/// Declarative rule owned by a claw. `name` is unique per owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflex {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Value-layer tag (social, cognitive, hygiene, ...). Classification only.
    pub value_layer: String,
    /// Behavior tag used by hard-constraint exemption and analytics.
    pub behavior: String,
    /// 0 = algorithmic action, 1 = queued for the external cognitive host.
    pub trigger_layer: u8,
    pub trigger: TriggerConfig,
    pub enabled: bool,
    pub confidence: f64,
    pub source: ReflexSource,
}

/// Outcome of one reflex evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Executed,
    Blocked,
    QueuedForL1,
    DispatchedToL1,
    L1Acknowledged,
}

impl ExecutionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionResult::Executed => "executed",
            ExecutionResult::Blocked => "blocked",
            ExecutionResult::QueuedForL1 => "queued_for_l1",
            ExecutionResult::DispatchedToL1 => "dispatched_to_l1",
            ExecutionResult::L1Acknowledged => "l1_acknowledged",
        }
    }
}

/// Audit log row written for every evaluated reflex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflexExecution {
    pub id: String,
    pub reflex_id: String,
    pub reflex_name: String,
    pub owner_id: String,
    pub event_type: String,
    pub trigger_payload: serde_json::Value,
    pub result: ExecutionResult,
    /// Opaque details map (emoji used, target claw, batch id, block reason).
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Heartbeats and friend models
// ============================================================================

/// Lightweight status/interest broadcast from one claw to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub id: String,
    pub from_claw: String,
    pub to_claw: String,
    #[serde(default)]
    pub status: String,
    /// Declared interest domain tags.
    #[serde(default)]
    pub interests: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Proxy model of a friend, aggregated from their heartbeat stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendModel {
    pub observer_id: String,
    pub friend_id: String,
    /// Interest tag to observation count.
    #[serde(default)]
    pub interest_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub last_status: String,
    pub updated_at: DateTime<Utc>,
}

impl FriendModel {
    /// Interest tags ordered by observation count, most seen first.
    pub fn top_interests(&self, limit: usize) -> Vec<String> {
        let mut tags: Vec<_> = self.interest_counts.iter().collect();
        tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        tags.into_iter().take(limit).map(|(tag, _)| tag.clone()).collect()
    }
}

// ============================================================================
// Collaborative threads
// ============================================================================

/// Workspace lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkThreadStatus {
    Active,
    Completed,
    Archived,
}

/// One participant's membership, with their copy of the workspace key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadParticipant {
    pub claw_id: String,
    /// Workspace key encrypted to this participant. Opaque to the core.
    #[serde(with = "serde_bytes_hex")]
    pub encrypted_key: Vec<u8>,
}

/// Encrypted collaborative workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkThread {
    pub id: String,
    pub creator_id: String,
    pub purpose: String,
    pub title: String,
    pub status: WorkThreadStatus,
    pub participants: Vec<ThreadParticipant>,
    pub created_at: DateTime<Utc>,
}

impl WorkThread {
    pub fn is_participant(&self, claw: &str) -> bool {
        self.participants.iter().any(|p| p.claw_id == claw)
    }
}

/// One contribution to a workspace. The body is ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContribution {
    pub id: String,
    pub thread_id: String,
    pub contributor_id: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a carapace (user configuration) change.
///
/// The staleness detector only reads the most recent timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarapaceRevision {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Hex (de)serialization for opaque key bytes.
mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dunbar_rank_orders_layers() {
        assert!(DunbarLayer::Core.rank() > DunbarLayer::Sympathy.rank());
        assert!(DunbarLayer::Sympathy.rank() > DunbarLayer::Active.rank());
        assert!(DunbarLayer::Active.rank() > DunbarLayer::Casual.rank());
    }

    #[test]
    fn trigger_config_round_trips_with_tag() {
        let trigger = TriggerConfig::Threshold {
            event_type: "relationship.layer_changed".into(),
            field: "strength".into(),
            op: ThresholdOp::Lt,
            value: 0.25,
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "threshold");
        assert_eq!(json["eventType"], "relationship.layer_changed");
        let back: TriggerConfig = serde_json::from_value(json).unwrap();
        assert!(matches!(back, TriggerConfig::Threshold { .. }));
    }

    #[test]
    fn pearl_primary_domain_falls_back_to_overall() {
        let pearl = Pearl {
            id: "p1".into(),
            owner_id: "o".into(),
            kind: "insight".into(),
            trigger: String::new(),
            domain_tags: vec![],
            body: serde_json::Value::Null,
            luster: 0.5,
            shareability: Shareability::FriendsOnly,
            share_conditions: None,
            origin: PearlOrigin::Manual,
            citations: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(pearl.primary_domain(), OVERALL_DOMAIN);
    }

    #[test]
    fn friend_model_top_interests_sorted_by_count() {
        let mut counts = BTreeMap::new();
        counts.insert("ai".to_string(), 5u32);
        counts.insert("rust".to_string(), 9);
        counts.insert("chess".to_string(), 2);
        let model = FriendModel {
            observer_id: "a".into(),
            friend_id: "b".into(),
            interest_counts: counts,
            last_status: String::new(),
            updated_at: Utc::now(),
        };
        assert_eq!(model.top_interests(2), vec!["rust".to_string(), "ai".to_string()]);
    }
}
