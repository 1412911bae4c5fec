//! Builtin reflex catalogs.
//!
//! Six Layer-0 reflexes execute algorithmically in-process; four Layer-1
//! reflexes enqueue work for the external cognitive host. Initialization
//! upserts are keyed by (owner, name) and idempotent.

use uuid::Uuid;

use crate::model::{CounterOp, Reflex, ReflexSource, TriggerConfig};

/// Canonical builtin reflex names.
pub mod names {
    pub const KEEPALIVE_HEARTBEAT: &str = "keepalive_heartbeat";
    pub const PHATIC_MICRO_REACTION: &str = "phatic_micro_reaction";
    pub const RELATIONSHIP_DECAY_ALERT: &str = "relationship_decay_alert";
    pub const COLLECT_POLL_RESPONSES: &str = "collect_poll_responses";
    pub const TRACK_THREAD_PROGRESS: &str = "track_thread_progress";
    pub const AUDIT_BEHAVIOR_LOG: &str = "audit_behavior_log";

    pub const ROUTE_PEARL_BY_INTEREST: &str = "route_pearl_by_interest";
    pub const SUMMARIZE_THREAD_ACTIVITY: &str = "summarize_thread_activity";
    pub const DRAFT_GROOM_REPLY: &str = "draft_groom_reply";
    pub const COMPOSE_BRIEFING: &str = "compose_briefing";
}

fn builtin(
    owner: &str,
    name: &str,
    value_layer: &str,
    behavior: &str,
    trigger_layer: u8,
    trigger: TriggerConfig,
) -> Reflex {
    Reflex {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.to_string(),
        name: name.to_string(),
        value_layer: value_layer.to_string(),
        behavior: behavior.to_string(),
        trigger_layer,
        trigger,
        enabled: true,
        confidence: 1.0,
        source: ReflexSource::Builtin,
    }
}

/// The six Layer-0 builtins.
pub fn layer0(owner: &str) -> Vec<Reflex> {
    vec![
        builtin(
            owner,
            names::KEEPALIVE_HEARTBEAT,
            "presence",
            "keepalive",
            0,
            TriggerConfig::Timer { interval_ms: None },
        ),
        builtin(
            owner,
            names::PHATIC_MICRO_REACTION,
            "social",
            "phatic",
            0,
            TriggerConfig::EventTypeWithTagIntersection {
                event_type: "message.new".to_string(),
                min_common_tags: 1,
            },
        ),
        builtin(
            owner,
            names::RELATIONSHIP_DECAY_ALERT,
            "social",
            "alert",
            0,
            TriggerConfig::EventType {
                event_type: "relationship.layer_changed".to_string(),
                condition: Some("downgrade".to_string()),
            },
        ),
        builtin(
            owner,
            names::COLLECT_POLL_RESPONSES,
            "coordination",
            "collect",
            0,
            TriggerConfig::Deadline {
                event_type: "poll.closing_soon".to_string(),
                within_ms: 3_600_000,
            },
        ),
        builtin(
            owner,
            names::TRACK_THREAD_PROGRESS,
            "coordination",
            "track",
            0,
            TriggerConfig::EventType {
                event_type: "thread.contribution_added".to_string(),
                condition: None,
            },
        ),
        builtin(
            owner,
            names::AUDIT_BEHAVIOR_LOG,
            "hygiene",
            "audit",
            0,
            TriggerConfig::AnyReflexExecution,
        ),
    ]
}

/// The four Layer-1 builtins.
pub fn layer1(owner: &str) -> Vec<Reflex> {
    vec![
        builtin(
            owner,
            names::ROUTE_PEARL_BY_INTEREST,
            "cognitive",
            "routing",
            1,
            TriggerConfig::EventType {
                event_type: "heartbeat.received".to_string(),
                condition: None,
            },
        ),
        builtin(
            owner,
            names::SUMMARIZE_THREAD_ACTIVITY,
            "cognitive",
            "summarize",
            1,
            TriggerConfig::Counter {
                event_type: "thread.contribution_added".to_string(),
                field: "contributionCount".to_string(),
                op: CounterOp::Gte,
                value: 5,
            },
        ),
        builtin(
            owner,
            names::DRAFT_GROOM_REPLY,
            "social",
            "groom",
            1,
            TriggerConfig::MultiHeartbeat { window_ms: Some(86_400_000) },
        ),
        builtin(
            owner,
            names::COMPOSE_BRIEFING,
            "cognitive",
            "briefing",
            1,
            TriggerConfig::Timer { interval_ms: Some(86_400_000) },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogs_have_expected_sizes() {
        assert_eq!(layer0("bob").len(), 6);
        assert_eq!(layer1("bob").len(), 4);
    }

    #[test]
    fn audit_reflex_is_present_and_enabled() {
        let audit = layer0("bob")
            .into_iter()
            .find(|r| r.name == names::AUDIT_BEHAVIOR_LOG)
            .unwrap();
        assert!(audit.enabled);
        assert_eq!(audit.behavior, "audit");
        assert!(matches!(audit.trigger, TriggerConfig::AnyReflexExecution));
    }

    #[test]
    fn layer1_reflexes_carry_layer_tag() {
        assert!(layer1("bob").iter().all(|r| r.trigger_layer == 1));
        assert!(layer0("bob").iter().all(|r| r.trigger_layer == 0));
    }
}
