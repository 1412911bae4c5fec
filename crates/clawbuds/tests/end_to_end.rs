//! End-to-end scenarios over the fully wired in-memory application.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use serde_json::json;

use clawbuds::bus::EventHandler;
use clawbuds::clock::Clock;
use clawbuds::config::Config;
use clawbuds::error::Result;
use clawbuds::events::{EventPayload, Topic};
use clawbuds::layer1::QueuedItem;
use clawbuds::model::{
    DunbarLayer, ExecutionResult, PearlOrigin, ShareConditions, Shareability, Visibility,
};
use clawbuds::message::SendMessage;
use clawbuds::reflex::builtins::names;
use clawbuds_testing::fixtures;

/// Recording subscriber for event assertions.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<EventPayload>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn events(&self) -> Vec<EventPayload> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: &EventPayload) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Give the bus lanes time to drain.
async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(100)).await;
}

fn text_message(text: &str) -> SendMessage {
    SendMessage { blocks: vec![json!({"type": "text", "text": text})], ..Default::default() }
}

// ============================================================================
// Scenario A: public fan-out
// ============================================================================

#[tokio::test]
async fn public_message_lands_in_friend_inbox_with_seq_one() {
    let (app, _clock, _notifier) = fixtures::app();
    let recorder = Recorder::new();
    app.bus.subscribe(Topic::MessageNew, recorder.clone());

    let alice = fixtures::onboard(&app, "Alice", &[]).await.unwrap();
    let bob = fixtures::onboard(&app, "Bob", &[]).await.unwrap();
    fixtures::befriend(&app, &alice, &bob).await.unwrap();

    let message =
        app.messages.send(&alice.id, Visibility::Public, text_message("hi")).await.unwrap();
    settle().await;

    let entry = app.storage.messages.find_inbox_entry(&bob.id, &message.id).await.unwrap().unwrap();
    assert_eq!(entry.seq, 1);
    assert_eq!(message.from_claw_id, alice.id);
    assert_eq!(message.blocks[0]["text"], "hi");

    let deliveries: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, EventPayload::MessageNew { .. }))
        .collect();
    assert_eq!(deliveries.len(), 1);
    match &deliveries[0] {
        EventPayload::MessageNew { recipient_id, .. } => assert_eq!(recipient_id, &bob.id),
        other => panic!("unexpected payload {other:?}"),
    }
}

// ============================================================================
// Scenario B: self-direct rejection
// ============================================================================

#[tokio::test]
async fn direct_message_to_self_is_rejected() {
    let (app, _clock, _notifier) = fixtures::app();
    let alice = fixtures::onboard(&app, "Alice", &[]).await.unwrap();

    let err = app
        .messages
        .send(
            &alice.id,
            Visibility::Direct,
            SendMessage {
                blocks: vec![json!({"type": "text", "text": "hello me"})],
                to_claw_ids: vec![alice.id.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_RECIPIENT");
    assert_eq!(app.messages.count_unread(&alice.id).await.unwrap(), 0);
}

// ============================================================================
// Scenario C: threads flatten to the root
// ============================================================================

#[tokio::test]
async fn replies_share_the_root_thread_id() {
    let (app, clock, _notifier) = fixtures::app();
    let alice = fixtures::onboard(&app, "Alice", &[]).await.unwrap();
    let bob = fixtures::onboard(&app, "Bob", &[]).await.unwrap();
    fixtures::befriend(&app, &alice, &bob).await.unwrap();

    let root = app.messages.send(&alice.id, Visibility::Public, text_message("root")).await.unwrap();
    clock.advance(Duration::seconds(1));
    let r1 = app
        .messages
        .send(
            &bob.id,
            Visibility::Public,
            SendMessage { reply_to_id: Some(root.id.clone()), ..text_message("r1") },
        )
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));
    let r2 = app
        .messages
        .send(
            &alice.id,
            Visibility::Public,
            SendMessage { reply_to_id: Some(r1.id.clone()), ..text_message("r2") },
        )
        .await
        .unwrap();

    assert_eq!(r1.thread_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(r2.thread_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(r2.reply_to_id.as_deref(), Some(r1.id.as_str()));

    let thread = app.messages.thread(&bob.id, &root.id).await.unwrap();
    let ids: Vec<&str> = thread.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![root.id.as_str(), r1.id.as_str(), r2.id.as_str()]);
}

// ============================================================================
// Scenario D: hard constraint blocks the 21st phatic reaction
// ============================================================================

#[tokio::test]
async fn twenty_first_matching_event_is_blocked() {
    let (app, _clock, _notifier) = fixtures::app();
    // Shared tags so the phatic tag-intersection trigger matches.
    let alice = fixtures::onboard(&app, "Alice", &["ai"]).await.unwrap();
    let bob = fixtures::onboard(&app, "Bob", &["ai"]).await.unwrap();
    fixtures::befriend(&app, &alice, &bob).await.unwrap();

    let mut last_id = String::new();
    for i in 0..21 {
        let message = app
            .messages
            .send(&alice.id, Visibility::Public, text_message(&format!("post {i}")))
            .await
            .unwrap();
        last_id = message.id;
        settle().await;
    }

    let since = app.clock.now() - Duration::hours(1);
    let executed = app
        .storage
        .executions
        .find_by_result(&bob.id, ExecutionResult::Executed, since)
        .await
        .unwrap();
    let phatic_executed =
        executed.iter().filter(|e| e.reflex_name == names::PHATIC_MICRO_REACTION).count();
    assert_eq!(phatic_executed, 20);

    let blocked = app
        .storage
        .executions
        .find_by_result(&bob.id, ExecutionResult::Blocked, since)
        .await
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].details["reason"], "hard_constraint");

    // The 21st message got no reaction.
    assert!(app.reactions.list(&last_id).await.unwrap().is_empty());
}

// ============================================================================
// Scenario E: trust composition
// ============================================================================

#[tokio::test]
async fn composite_matches_weighted_sum_exactly() {
    let (app, _clock, _notifier) = fixtures::app();
    let score = app
        .trust
        .upsert_dimensions("a", "b", "_overall", 0.6, Some(0.8), 0.5, 0.2)
        .await
        .unwrap();
    assert!((score.composite - 0.60).abs() < 1e-12);
}

// ============================================================================
// Scenario F: layer-1 batch flush
// ============================================================================

#[tokio::test]
async fn three_items_flush_as_one_batch() {
    let config = Config { l1_batch_size: 3, ..Config::default() };
    let (app, clock, notifier) = fixtures::app_with_config(config);
    let bob = fixtures::onboard(&app, "Bob", &[]).await.unwrap();

    for i in 0..3 {
        app.batch
            .enqueue(QueuedItem {
                reflex_id: format!("r{i}"),
                reflex_name: names::SUMMARIZE_THREAD_ACTIVITY.to_string(),
                claw_id: bob.id.clone(),
                event_type: "thread.contribution_added".to_string(),
                trigger_data: json!({"threadId": "t1"}),
                enqueued_at: clock.now(),
            })
            .await
            .unwrap();
    }
    settle().await;

    let triggers = notifier.triggers();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].items.len(), 3);

    let since = clock.now() - Duration::hours(1);
    let dispatched = app
        .storage
        .executions
        .find_by_result(&bob.id, ExecutionResult::DispatchedToL1, since)
        .await
        .unwrap();
    assert_eq!(dispatched.len(), 3);
    let batch_ids: std::collections::BTreeSet<_> =
        dispatched.iter().filter_map(|e| e.batch_id.clone()).collect();
    assert_eq!(batch_ids.len(), 1);
    assert!(batch_ids.contains(&triggers[0].batch_id));

    // Acknowledgement marks all three rows.
    assert_eq!(app.batch.acknowledge(&triggers[0].batch_id).await.unwrap(), 3);
    assert_eq!(app.batch.acknowledge("unknown-batch").await.unwrap(), 0);
}

// ============================================================================
// Relationship decay and layer events
// ============================================================================

#[tokio::test]
async fn week_idle_edge_downgrades_once() {
    let (app, clock, _notifier) = fixtures::app();
    let recorder = Recorder::new();
    app.bus.subscribe(Topic::RelationshipLayerChanged, recorder.clone());

    let alice = fixtures::onboard(&app, "Alice", &[]).await.unwrap();
    let bob = fixtures::onboard(&app, "Bob", &[]).await.unwrap();
    fixtures::befriend(&app, &alice, &bob).await.unwrap();
    settle().await;

    // Seeded at 0.5 (sympathy). One idle week halves it to 0.25 (active).
    clock.advance(Duration::days(7));
    let row = app.relationships.current(&alice.id, &bob.id).await.unwrap().unwrap();
    assert!((row.strength - 0.25).abs() < 1e-9);
    assert_eq!(row.layer, DunbarLayer::Active);

    // A second read does not re-cross the band.
    let again = app.relationships.current(&alice.id, &bob.id).await.unwrap().unwrap();
    assert_eq!(again.layer, DunbarLayer::Active);
    settle().await;

    let changes: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| {
            matches!(e, EventPayload::RelationshipLayerChanged { from_claw, .. } if *from_claw == alice.id)
        })
        .collect();
    assert_eq!(changes.len(), 1);
    match &changes[0] {
        EventPayload::RelationshipLayerChanged { old_layer, new_layer, .. } => {
            assert_eq!(*old_layer, DunbarLayer::Sympathy);
            assert_eq!(*new_layer, DunbarLayer::Active);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

// ============================================================================
// Reflex management
// ============================================================================

#[tokio::test]
async fn audit_reflex_cannot_be_disabled() {
    let (app, _clock, _notifier) = fixtures::app();
    let bob = fixtures::onboard(&app, "Bob", &[]).await.unwrap();

    let err = app.engine.disable_reflex(&bob.id, names::AUDIT_BEHAVIOR_LOG).await.unwrap_err();
    assert_eq!(err.kind(), "FORBIDDEN");

    let err = app.engine.disable_reflex(&bob.id, "no_such_reflex").await.unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");

    // Other reflexes toggle normally, and initialization is idempotent.
    app.engine.disable_reflex(&bob.id, names::PHATIC_MICRO_REACTION).await.unwrap();
    app.engine.initialize_builtins(&bob.id).await.unwrap();
    assert_eq!(app.engine.list_reflexes(&bob.id).await.unwrap().len(), 10);
}

// ============================================================================
// Pearl routing gating and the frequency cap
// ============================================================================

#[tokio::test]
async fn low_trust_pearl_produces_no_routing_context() {
    let (app, _clock, _notifier) = fixtures::app();
    let owner = fixtures::onboard(&app, "Owner", &[]).await.unwrap();
    let friend = fixtures::onboard(&app, "Friend", &[]).await.unwrap();
    fixtures::befriend(&app, &owner, &friend).await.unwrap();

    app.pearls
        .create(
            &owner.id,
            "insight",
            "when discussing transformers",
            vec!["AI".to_string()],
            json!({"text": "attention is most of what you need"}),
            Shareability::FriendsOnly,
            Some(ShareConditions { trust_threshold: Some(0.9), domain_match: None }),
            PearlOrigin::Manual,
        )
        .await
        .unwrap();
    app.trust
        .upsert_dimensions(&owner.id, &friend.id, "AI", 0.3, Some(0.3), 0.3, 0.3)
        .await
        .unwrap();

    let context = app
        .router
        .build_context(&owner.id, &friend.id, &["AI".to_string()])
        .await
        .unwrap();
    assert!(context.is_none());
}

#[tokio::test]
async fn fourth_routing_in_a_day_is_dropped() {
    let (app, clock, _notifier) = fixtures::app();
    let owner = fixtures::onboard(&app, "Owner", &["AI"]).await.unwrap();
    let friend = fixtures::onboard(&app, "Friend", &["AI"]).await.unwrap();
    fixtures::befriend(&app, &owner, &friend).await.unwrap();

    // A pearl that would otherwise route.
    app.pearls
        .create(
            &owner.id,
            "insight",
            "transformer tips",
            vec!["AI".to_string()],
            json!({"text": "tip"}),
            Shareability::FriendsOnly,
            None,
            PearlOrigin::Manual,
        )
        .await
        .unwrap();

    // Three routing dispatches already audited in the last 24 h.
    for i in 0..3 {
        app.storage
            .executions
            .insert(clawbuds::model::ReflexExecution {
                id: format!("e{i}"),
                reflex_id: "r1".to_string(),
                reflex_name: names::ROUTE_PEARL_BY_INTEREST.to_string(),
                owner_id: owner.id.clone(),
                event_type: "heartbeat.received".to_string(),
                trigger_payload: json!({}),
                result: ExecutionResult::DispatchedToL1,
                details: json!({"targetClawId": friend.id}),
                batch_id: Some(format!("b{i}")),
                created_at: clock.now() - Duration::hours(2),
            })
            .await
            .unwrap();
    }
    assert!(app.router.frequency_cap_hit(&owner.id, &friend.id).await.unwrap());

    // The fourth matching heartbeat is dropped with no routing enqueue. The
    // groom-draft builtin still queues its own unrelated item.
    app.heartbeats.broadcast(&friend.id, "hacking", vec!["AI".to_string()]).await.unwrap();
    settle().await;

    let since = clock.now() - Duration::hours(1);
    let queued = app
        .storage
        .executions
        .find_by_result(&owner.id, ExecutionResult::QueuedForL1, since)
        .await
        .unwrap();
    assert!(queued.iter().all(|e| e.reflex_name != names::ROUTE_PEARL_BY_INTEREST));
    assert!(queued.iter().any(|e| e.reflex_name == names::DRAFT_GROOM_REPLY));
}

// ============================================================================
// Auto-share guard
// ============================================================================

#[tokio::test]
async fn routed_share_enforces_domain_match() {
    let (app, _clock, _notifier) = fixtures::app();
    let owner = fixtures::onboard(&app, "Owner", &[]).await.unwrap();
    let friend = fixtures::onboard(&app, "Friend", &[]).await.unwrap();
    fixtures::befriend(&app, &owner, &friend).await.unwrap();

    let pearl = app
        .pearls
        .create(
            &owner.id,
            "insight",
            "rust tips",
            vec!["rust".to_string()],
            json!({}),
            Shareability::FriendsOnly,
            Some(ShareConditions { trust_threshold: None, domain_match: Some(true) }),
            PearlOrigin::Manual,
        )
        .await
        .unwrap();

    let context = clawbuds::routing::RoutingContext {
        owner_id: owner.id.clone(),
        friend_id: friend.id.clone(),
        interests: vec!["chess".to_string()],
        candidates: vec![],
    };
    let err =
        app.pearls.share(&owner.id, &pearl.id, &friend.id, Some(&context)).await.unwrap_err();
    assert_eq!(err.kind(), "DOMAIN_MISMATCH");

    // A manual share skips the guard.
    app.pearls.share(&owner.id, &pearl.id, &friend.id, None).await.unwrap();
}

// ============================================================================
// Endorsement rules
// ============================================================================

#[tokio::test]
async fn owner_cannot_endorse_own_pearl() {
    let (app, _clock, _notifier) = fixtures::app();
    let owner = fixtures::onboard(&app, "Owner", &[]).await.unwrap();
    let pearl = app
        .pearls
        .create(
            &owner.id,
            "insight",
            "self praise",
            vec![],
            json!({}),
            Shareability::Private,
            None,
            PearlOrigin::Manual,
        )
        .await
        .unwrap();
    let err = app.pearls.endorse(&owner.id, &pearl.id, 1.0, None).await.unwrap_err();
    assert_eq!(err.kind(), "SELF_ENDORSE");

    // Sharing a private pearl is refused too.
    let friend = fixtures::onboard(&app, "Friend", &[]).await.unwrap();
    fixtures::befriend(&app, &owner, &friend).await.unwrap();
    let err = app.pearls.share(&owner.id, &pearl.id, &friend.id, None).await.unwrap_err();
    assert_eq!(err.kind(), "PRIVATE");
}
