//! Timer tick emitter.
//!
//! A background task emitting `timer.tick` on a fixed cadence. Ticks drive
//! keepalive reflexes, the poll closing-soon sweep and briefing schedules.
//! The task honors a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::bus::EventBus;
use crate::clock::SharedClock;
use crate::events::EventPayload;

/// Spawn the tick loop. Returns the task handle.
pub fn spawn_ticker(
    bus: Arc<EventBus>,
    clock: SharedClock,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of tokio's interval fires immediately; skip it so
        // tick cadence starts one interval after boot.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    bus.emit(EventPayload::TimerTick {
                        interval_ms: interval.as_millis() as u64,
                        at: clock.now(),
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
