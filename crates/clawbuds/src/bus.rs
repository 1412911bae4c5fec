//! In-process event bus.
//!
//! A topic-keyed fan-out dispatcher. Each topic owns an unbounded FIFO lane
//! drained by a dedicated task, so `emit` never blocks the producing side's
//! critical section and per-topic ordering matches emission order from a
//! single producer. Handler failures and panics are isolated: they are
//! logged and never reach the emitter or subsequent handlers.
//!
//! Subscription happens during startup wiring only; the subscriber list is
//! effectively read-only once traffic starts.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::events::{EventPayload, Topic};

/// A subscriber invoked for every emission on its topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Diagnostic name used in failure logs.
    fn name(&self) -> &'static str {
        "handler"
    }

    async fn handle(&self, event: &EventPayload) -> Result<()>;
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

struct TopicLane {
    tx: mpsc::UnboundedSender<EventPayload>,
    handlers: HandlerList,
}

/// Topic-keyed fan-out dispatcher.
pub struct EventBus {
    lanes: DashMap<Topic, TopicLane>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { lanes: DashMap::new() }
    }

    /// Register a handler for a topic. Handlers run in registration order.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) {
        let lane = self.lanes.entry(topic).or_insert_with(|| Self::spawn_lane(topic));
        lane.handlers.write().push(handler);
    }

    /// Deliver a payload to every current subscriber of its topic.
    ///
    /// Non-blocking; the payload is queued on the topic lane and dispatched
    /// after the caller's side-effect has committed. Emissions on a topic
    /// with no subscribers are dropped.
    pub fn emit(&self, payload: EventPayload) {
        let topic = payload.topic();
        match self.lanes.get(&topic) {
            Some(lane) => {
                if lane.tx.send(payload).is_err() {
                    warn!(topic = topic.as_str(), "event lane closed, dropping emission");
                }
            }
            None => debug!(topic = topic.as_str(), "no subscribers, dropping emission"),
        }
    }

    fn spawn_lane(topic: Topic) -> TopicLane {
        let (tx, mut rx) = mpsc::unbounded_channel::<EventPayload>();
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));
        let lane_handlers = Arc::clone(&handlers);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Snapshot under the lock; never hold it across an await.
                let current: Vec<Arc<dyn EventHandler>> = lane_handlers.read().clone();
                for handler in current {
                    let outcome = AssertUnwindSafe(handler.handle(&event)).catch_unwind().await;
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(
                            topic = topic.as_str(),
                            handler = handler.name(),
                            error = %err,
                            "event handler failed"
                        ),
                        Err(_) => error!(
                            topic = topic.as_str(),
                            handler = handler.name(),
                            "event handler panicked"
                        ),
                    }
                }
            }
        });

        TopicLane { tx, handlers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &EventPayload) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _event: &EventPayload) -> Result<()> {
            Err(crate::error::CoreError::Internal("boom".into()))
        }
    }

    fn tick() -> EventPayload {
        EventPayload::TimerTick { interval_ms: 1000, at: Utc::now() }
    }

    #[tokio::test]
    async fn delivers_to_all_handlers_in_order() {
        let bus = EventBus::new();
        let first = Arc::new(Counting { seen: AtomicUsize::new(0) });
        let second = Arc::new(Counting { seen: AtomicUsize::new(0) });
        bus.subscribe(Topic::TimerTick, first.clone());
        bus.subscribe(Topic::TimerTick, second.clone());

        bus.emit(tick());
        bus.emit(tick());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.seen.load(Ordering::SeqCst), 2);
        assert_eq!(second.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_later_handlers() {
        let bus = EventBus::new();
        let counting = Arc::new(Counting { seen: AtomicUsize::new(0) });
        bus.subscribe(Topic::TimerTick, Arc::new(Failing));
        bus.subscribe(Topic::TimerTick, counting.clone());

        bus.emit(tick());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(tick());
    }
}
