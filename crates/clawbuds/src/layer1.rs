//! Layer-1 batch dispatcher.
//!
//! Reflexes whose work needs the external cognitive host enqueue items
//! here. The FIFO queue flushes when it reaches the configured batch size
//! or when its oldest item has waited long enough; each flushed item gets a
//! `dispatched_to_l1` audit row tagged with the batch id, and the notifier
//! invocation is fire-and-forget. Acknowledgement from the host marks the
//! batch rows `l1_acknowledged`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::Result;
use crate::model::{ExecutionResult, ReflexExecution};
use crate::notifier::{AgentNotifier, AgentTrigger, TriggerKind};
use crate::storage::ExecutionRepository;

/// How often the age trigger is evaluated.
const AGE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// One queued unit of Layer-1 work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    pub reflex_id: String,
    pub reflex_name: String,
    pub claw_id: String,
    pub event_type: String,
    /// Trigger payload plus any routing context the engine attached.
    pub trigger_data: serde_json::Value,
    #[serde(skip)]
    pub enqueued_at: DateTime<Utc>,
}

/// Size-and-deadline triggered batching to the external notifier.
pub struct BatchProcessor {
    queue: Mutex<VecDeque<QueuedItem>>,
    batch_size: usize,
    max_wait: Duration,
    notifier: Arc<dyn AgentNotifier>,
    executions: Arc<dyn ExecutionRepository>,
    clock: SharedClock,
}

impl BatchProcessor {
    pub fn new(
        config: &Config,
        notifier: Arc<dyn AgentNotifier>,
        executions: Arc<dyn ExecutionRepository>,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            batch_size: config.l1_batch_size.max(1),
            max_wait: config.l1_max_wait,
            notifier,
            executions,
            clock,
        })
    }

    /// Append an item; a full queue flushes immediately.
    pub async fn enqueue(&self, item: QueuedItem) -> Result<()> {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.push_back(item);
            queue.len() >= self.batch_size
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drain up to one batch and dispatch it.
    ///
    /// Returns the batch id, or `None` when the queue was empty. Notifier
    /// failures are logged and never surface.
    pub async fn flush(&self) -> Result<Option<String>> {
        let batch: Vec<QueuedItem> = {
            let mut queue = self.queue.lock().await;
            let take = queue.len().min(self.batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(None);
        }

        let batch_id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        for item in &batch {
            let mut details = item.trigger_data.clone();
            if let Some(obj) = details.as_object_mut() {
                obj.insert("batchId".to_string(), serde_json::Value::String(batch_id.clone()));
            }
            let record = ReflexExecution {
                id: Uuid::new_v4().to_string(),
                reflex_id: item.reflex_id.clone(),
                reflex_name: item.reflex_name.clone(),
                owner_id: item.claw_id.clone(),
                event_type: item.event_type.clone(),
                trigger_payload: item.trigger_data.clone(),
                result: ExecutionResult::DispatchedToL1,
                details,
                batch_id: Some(batch_id.clone()),
                created_at: now,
            };
            if let Err(err) = self.executions.insert(record).await {
                warn!(batch = %batch_id, error = %err, "dispatch audit write failed");
            }
        }

        let trigger = AgentTrigger {
            batch_id: batch_id.clone(),
            kind: TriggerKind::ReflexBatch,
            message: format!("{} queued reflex item(s)", batch.len()),
            items: batch
                .iter()
                .map(|item| serde_json::to_value(item).unwrap_or(serde_json::Value::Null))
                .collect(),
        };
        let notifier = Arc::clone(&self.notifier);
        let dispatched = batch_id.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.trigger_agent(trigger).await {
                warn!(batch = %dispatched, error = %err, "notifier delivery failed");
            }
        });

        debug!(batch = %batch_id, size = batch.len(), "layer-1 batch dispatched");
        Ok(Some(batch_id))
    }

    /// Mark a dispatched batch acknowledged, returning how many rows moved.
    /// Unknown batches return 0.
    pub async fn acknowledge(&self, batch_id: &str) -> Result<u64> {
        self.executions
            .mark_batch(batch_id, ExecutionResult::DispatchedToL1, ExecutionResult::L1Acknowledged)
            .await
    }

    /// Background loop driving the age-based flush trigger.
    ///
    /// Exits on shutdown after finishing any in-flight flush.
    pub fn spawn_age_flusher(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let processor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AGE_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if processor.oldest_expired().await {
                            if let Err(err) = processor.flush().await {
                                warn!(error = %err, "age-triggered flush failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            if let Err(err) = processor.flush().await {
                                warn!(error = %err, "shutdown flush failed");
                            }
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn oldest_expired(&self) -> bool {
        let queue = self.queue.lock().await;
        match queue.front() {
            Some(item) => {
                let age = self.clock.now() - item.enqueued_at;
                age.num_milliseconds() >= self.max_wait.as_millis() as i64
            }
            None => false,
        }
    }
}
