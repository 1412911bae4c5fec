// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]

//! # ClawBuds Testing Utilities
//!
//! - [`ManualClock`]: an advanceable clock so decay, frequency caps and
//!   hour buckets can be driven deterministically
//! - [`CapturingNotifier`]: records every agent trigger for assertions
//! - [`fixtures`]: a wired in-memory application plus common setup steps

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use clawbuds::clock::Clock;
use clawbuds::error::Result;
use clawbuds::notifier::{AgentNotifier, AgentTrigger};

/// A clock tests can set and advance.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at a fixed, readable instant.
    pub fn new() -> Arc<Self> {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Arc::new(Self { now: Mutex::new(start) })
    }

    pub fn starting_at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(start) })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Notifier that records everything it is asked to deliver.
#[derive(Default)]
pub struct CapturingNotifier {
    triggers: Mutex<Vec<AgentTrigger>>,
    notes: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn triggers(&self) -> Vec<AgentTrigger> {
        self.triggers.lock().clone()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.lock().len()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }
}

#[async_trait]
impl AgentNotifier for CapturingNotifier {
    async fn trigger_agent(&self, trigger: AgentTrigger) -> Result<()> {
        self.triggers.lock().push(trigger);
        Ok(())
    }

    async fn notify(&self, message: &str) -> Result<()> {
        self.notes.lock().push(message.to_string());
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Ready-made application graphs and setup steps.
pub mod fixtures {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use clawbuds::app::ClawBuds;
    use clawbuds::config::Config;
    use clawbuds::error::Result;
    use clawbuds::model::Claw;
    use clawbuds::storage::Storage;

    use super::{CapturingNotifier, ManualClock};

    /// A fully wired in-memory application with a manual clock and a
    /// capturing notifier.
    pub fn app() -> (Arc<ClawBuds>, Arc<ManualClock>, Arc<CapturingNotifier>) {
        app_with_config(Config::default())
    }

    pub fn app_with_config(
        config: Config,
    ) -> (Arc<ClawBuds>, Arc<ManualClock>, Arc<CapturingNotifier>) {
        let clock = ManualClock::new();
        let notifier = CapturingNotifier::new();
        let app = ClawBuds::new(config, Storage::in_memory(), notifier.clone(), clock.clone());
        (app, clock, notifier)
    }

    /// Register a claw with builtins installed, using the display name as
    /// key material so ids are stable within a test.
    pub async fn onboard(app: &ClawBuds, name: &str, tags: &[&str]) -> Result<Claw> {
        let tags: BTreeSet<String> = tags.iter().map(|t| t.to_string()).collect();
        app.onboard(format!("{name}-key").as_bytes(), name, "", tags, true).await
    }

    /// Make two claws accepted friends.
    pub async fn befriend(app: &ClawBuds, a: &Claw, b: &Claw) -> Result<()> {
        let request = app.friendships.send_request(&a.id, &b.id).await?;
        app.friendships.accept(&b.id, &request.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let before = clock.now();
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now() - before, Duration::hours(2));
    }

    #[tokio::test]
    async fn capturing_notifier_records() {
        let notifier = CapturingNotifier::new();
        notifier.notify("wake").await.unwrap();
        assert_eq!(notifier.notes(), vec!["wake".to_string()]);
    }
}
