//! Trigger matching.
//!
//! Pure evaluation of a [`TriggerConfig`] against a canonical [`BusEvent`].
//! No I/O happens here; the only ambient input is the caller-supplied
//! instant used by deadline windows.

use chrono::{DateTime, Utc};

use crate::events::BusEvent;
use crate::model::{CounterOp, ThresholdOp, TriggerConfig};

/// Rank of a Dunbar layer name; core > sympathy > active > casual.
fn layer_rank(name: &str) -> Option<u8> {
    match name {
        "core" => Some(3),
        "sympathy" => Some(2),
        "active" => Some(1),
        "casual" => Some(0),
        _ => None,
    }
}

fn string_list(event: &BusEvent, field: &str) -> Vec<String> {
    event
        .data
        .get(field)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Does `trigger` match `event` at instant `now`?
pub fn matches(trigger: &TriggerConfig, event: &BusEvent, now: DateTime<Utc>) -> bool {
    match trigger {
        TriggerConfig::EventType { event_type, condition } => {
            if event.event_type != *event_type {
                return false;
            }
            match condition.as_deref() {
                Some("downgrade") => {
                    let old = event
                        .data
                        .get("oldLayer")
                        .and_then(|v| v.as_str())
                        .and_then(layer_rank);
                    let new = event
                        .data
                        .get("newLayer")
                        .and_then(|v| v.as_str())
                        .and_then(layer_rank);
                    matches!((old, new), (Some(old), Some(new)) if old > new)
                }
                Some(_) => false,
                None => true,
            }
        }
        TriggerConfig::Timer { interval_ms } => {
            if event.event_type != "timer.tick" {
                return false;
            }
            match interval_ms {
                Some(wanted) => {
                    event.data.get("intervalMs").and_then(|v| v.as_u64()) == Some(*wanted)
                }
                None => true,
            }
        }
        TriggerConfig::EventTypeWithTagIntersection { event_type, min_common_tags } => {
            if event.event_type != *event_type {
                return false;
            }
            let tags = string_list(event, "domainTags");
            let interests = string_list(event, "senderInterests");
            let common = tags.iter().filter(|t| interests.contains(t)).count();
            common >= *min_common_tags
        }
        TriggerConfig::Threshold { event_type, field, op, value } => {
            if event.event_type != *event_type {
                return false;
            }
            match event.number_field(field) {
                Some(actual) => match op {
                    ThresholdOp::Lt => actual < *value,
                    ThresholdOp::Lte => actual <= *value,
                    ThresholdOp::Gt => actual > *value,
                    ThresholdOp::Gte => actual >= *value,
                },
                None => false,
            }
        }
        TriggerConfig::Counter { event_type, field, op, value } => {
            if event.event_type != *event_type {
                return false;
            }
            match event.data.get(field).and_then(|v| v.as_i64()) {
                Some(actual) => match op {
                    CounterOp::Gt => actual > *value,
                    CounterOp::Gte => actual >= *value,
                },
                None => false,
            }
        }
        TriggerConfig::Deadline { event_type, within_ms } => {
            if event.event_type != *event_type {
                return false;
            }
            let closes_at: Option<DateTime<Utc>> = event
                .data
                .get("closesAt")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok());
            match closes_at {
                Some(closes_at) => {
                    closes_at > now
                        && (closes_at - now).num_milliseconds() <= *within_ms as i64
                }
                None => false,
            }
        }
        TriggerConfig::AnyReflexExecution => event.event_type == "__reflex_execution__",
        // The multi-heartbeat predicate belongs to the Layer-1 host; at this
        // layer it only gates on the carrying event type so the item can be
        // queued for the host to judge.
        TriggerConfig::MultiHeartbeat { .. } => event.event_type == "heartbeat.received",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: &str, data: serde_json::Value) -> BusEvent {
        BusEvent { event_type: event_type.to_string(), claw_id: "owner".into(), data }
    }

    #[test]
    fn event_type_matches_exactly() {
        let trigger = TriggerConfig::EventType {
            event_type: "friend.accepted".into(),
            condition: None,
        };
        assert!(matches(&trigger, &event("friend.accepted", json!({})), Utc::now()));
        assert!(!matches(&trigger, &event("friend.removed", json!({})), Utc::now()));
    }

    #[test]
    fn downgrade_condition_compares_layer_order() {
        let trigger = TriggerConfig::EventType {
            event_type: "relationship.layer_changed".into(),
            condition: Some("downgrade".into()),
        };
        let downgrade = event(
            "relationship.layer_changed",
            json!({"oldLayer": "sympathy", "newLayer": "active"}),
        );
        let upgrade = event(
            "relationship.layer_changed",
            json!({"oldLayer": "active", "newLayer": "core"}),
        );
        assert!(matches(&trigger, &downgrade, Utc::now()));
        assert!(!matches(&trigger, &upgrade, Utc::now()));
    }

    #[test]
    fn timer_pins_to_interval_when_set() {
        let any = TriggerConfig::Timer { interval_ms: None };
        let hourly = TriggerConfig::Timer { interval_ms: Some(3_600_000) };
        let tick = event("timer.tick", json!({"intervalMs": 3_600_000u64}));
        let fast_tick = event("timer.tick", json!({"intervalMs": 60_000u64}));
        assert!(matches(&any, &tick, Utc::now()));
        assert!(matches(&any, &fast_tick, Utc::now()));
        assert!(matches(&hourly, &tick, Utc::now()));
        assert!(!matches(&hourly, &fast_tick, Utc::now()));
    }

    #[test]
    fn tag_intersection_counts_common_tags() {
        let trigger = TriggerConfig::EventTypeWithTagIntersection {
            event_type: "message.new".into(),
            min_common_tags: 2,
        };
        let enough = event(
            "message.new",
            json!({"domainTags": ["ai", "rust", "chess"], "senderInterests": ["rust", "ai"]}),
        );
        let short = event(
            "message.new",
            json!({"domainTags": ["ai"], "senderInterests": ["ai"]}),
        );
        assert!(matches(&trigger, &enough, Utc::now()));
        assert!(!matches(&trigger, &short, Utc::now()));
    }

    #[test]
    fn threshold_compares_numeric_field() {
        let trigger = TriggerConfig::Threshold {
            event_type: "relationship.layer_changed".into(),
            field: "strength".into(),
            op: ThresholdOp::Lt,
            value: 0.25,
        };
        assert!(matches(
            &trigger,
            &event("relationship.layer_changed", json!({"strength": 0.1})),
            Utc::now()
        ));
        assert!(!matches(
            &trigger,
            &event("relationship.layer_changed", json!({"strength": 0.9})),
            Utc::now()
        ));
        assert!(!matches(
            &trigger,
            &event("relationship.layer_changed", json!({})),
            Utc::now()
        ));
    }

    #[test]
    fn deadline_requires_future_within_window() {
        let trigger = TriggerConfig::Deadline {
            event_type: "poll.closing_soon".into(),
            within_ms: 3_600_000,
        };
        let now = Utc::now();
        let soon = event(
            "poll.closing_soon",
            json!({"closesAt": (now + chrono::Duration::minutes(30)).to_rfc3339()}),
        );
        let far = event(
            "poll.closing_soon",
            json!({"closesAt": (now + chrono::Duration::hours(5)).to_rfc3339()}),
        );
        let past = event(
            "poll.closing_soon",
            json!({"closesAt": (now - chrono::Duration::minutes(5)).to_rfc3339()}),
        );
        assert!(matches(&trigger, &soon, now));
        assert!(!matches(&trigger, &far, now));
        assert!(!matches(&trigger, &past, now));
    }

    #[test]
    fn counter_requires_integer_field() {
        let trigger = TriggerConfig::Counter {
            event_type: "thread.contribution_added".into(),
            field: "contributionCount".into(),
            op: CounterOp::Gte,
            value: 5,
        };
        assert!(matches(
            &trigger,
            &event("thread.contribution_added", json!({"contributionCount": 5})),
            Utc::now()
        ));
        assert!(!matches(
            &trigger,
            &event("thread.contribution_added", json!({"contributionCount": 4})),
            Utc::now()
        ));
    }
}
