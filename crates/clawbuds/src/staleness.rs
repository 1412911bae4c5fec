//! Behavioural pattern staleness.
//!
//! Periodic analysis over the last 30 days of reflex executions and
//! carapace history. The four checks share a single read of that data, and
//! the same snapshot feeds the health score.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::Result;
use crate::model::{CarapaceRevision, ExecutionResult, ReflexExecution};
use crate::storage::Storage;

/// Days of execution history the detector reads.
const ANALYSIS_WINDOW_DAYS: i64 = 30;
/// Minimum executed records before repetition is judged.
const REPETITION_MIN_EVENTS: usize = 10;
/// Share of one reflex among executed records that counts as repetition.
const REPETITION_THRESHOLD: f64 = 0.80;
/// Minimum emoji-carrying events before monotony is judged.
const MONOTONY_MIN_EVENTS: usize = 10;
/// Minimum groom-phrase events before repetition is judged.
const GROOM_MIN_EVENTS: usize = 5;

/// What kind of staleness was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ReflexRepetition,
    EmojiMonotony,
    CarapaceStale,
    GroomPhraseRepetition,
}

/// One staleness finding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessAlert {
    pub kind: AlertKind,
    pub description: String,
    /// Observed rate or age ratio behind the finding, in [0, 1] where
    /// meaningful.
    pub severity: f64,
}

/// Sub-scores and their mean, each in [0, 1].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    pub reflex_diversity: f64,
    pub template_diversity: f64,
    pub carapace_freshness: f64,
    pub overall: f64,
}

/// Alerts plus health, produced from one data read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessReport {
    pub alerts: Vec<StalenessAlert>,
    pub health: HealthScore,
}

/// Monotony, repetition and freshness analysis for one claw.
pub struct StalenessDetector {
    storage: Storage,
    clock: SharedClock,
    stale_days: u32,
    monotony_threshold: f64,
    groom_threshold: f64,
}

impl StalenessDetector {
    pub fn new(storage: Storage, clock: SharedClock, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            storage,
            clock,
            stale_days: config.carapace_stale_days,
            monotony_threshold: config.monotony_threshold,
            groom_threshold: config.groom_repetition_threshold,
        })
    }

    /// Run all four checks and the health score over one shared read.
    pub async fn report(&self, owner: &str) -> Result<StalenessReport> {
        let since = self.clock.now() - Duration::days(ANALYSIS_WINDOW_DAYS);
        let executions = self.storage.executions.find_recent(owner, since).await?;
        let latest_revision = self.storage.carapace.latest(owner).await?;

        let executed: Vec<&ReflexExecution> =
            executions.iter().filter(|e| e.result == ExecutionResult::Executed).collect();

        let mut alerts = Vec::new();

        // Reflex repetition.
        let (max_reflex_rate, max_reflex_name) = dominant_rate(
            executed.iter().map(|e| e.reflex_name.as_str()),
        );
        if executed.len() >= REPETITION_MIN_EVENTS && max_reflex_rate > REPETITION_THRESHOLD {
            alerts.push(StalenessAlert {
                kind: AlertKind::ReflexRepetition,
                description: format!(
                    "{max_reflex_name} accounts for {:.0}% of executed reflexes",
                    max_reflex_rate * 100.0
                ),
                severity: max_reflex_rate,
            });
        }

        // Emoji monotony within phatic reactions.
        let emojis: Vec<&str> = executed
            .iter()
            .filter_map(|e| e.details.get("emoji").and_then(|v| v.as_str()))
            .collect();
        let (max_emoji_rate, max_emoji) = dominant_rate(emojis.iter().copied());
        if emojis.len() >= MONOTONY_MIN_EVENTS && max_emoji_rate >= self.monotony_threshold {
            alerts.push(StalenessAlert {
                kind: AlertKind::EmojiMonotony,
                description: format!(
                    "{max_emoji} makes up {:.0}% of recent reactions",
                    max_emoji_rate * 100.0
                ),
                severity: max_emoji_rate,
            });
        }

        // Carapace staleness.
        let days_since = self.days_since_revision(latest_revision.as_ref());
        match days_since {
            Some(days) if days > i64::from(self.stale_days) => alerts.push(StalenessAlert {
                kind: AlertKind::CarapaceStale,
                description: format!("carapace unchanged for {days} days"),
                severity: 1.0,
            }),
            None => alerts.push(StalenessAlert {
                kind: AlertKind::CarapaceStale,
                description: "carapace has never been updated".to_string(),
                severity: 1.0,
            }),
            _ => {}
        }

        // Groom phrase repetition.
        let phrases: Vec<&str> = executions
            .iter()
            .filter_map(|e| e.details.get("groomPhrase").and_then(|v| v.as_str()))
            .collect();
        let (max_phrase_rate, max_phrase) = dominant_rate(phrases.iter().copied());
        if phrases.len() >= GROOM_MIN_EVENTS && max_phrase_rate >= self.groom_threshold {
            alerts.push(StalenessAlert {
                kind: AlertKind::GroomPhraseRepetition,
                description: format!(
                    "\"{max_phrase}\" makes up {:.0}% of groom openers",
                    max_phrase_rate * 100.0
                ),
                severity: max_phrase_rate,
            });
        }

        let health = self.health_from(&executed, max_emoji_rate, days_since);
        Ok(StalenessReport { alerts, health })
    }

    fn days_since_revision(&self, revision: Option<&CarapaceRevision>) -> Option<i64> {
        revision.map(|r| (self.clock.now() - r.created_at).num_days())
    }

    fn health_from(
        &self,
        executed: &[&ReflexExecution],
        max_emoji_rate: f64,
        days_since: Option<i64>,
    ) -> HealthScore {
        let total = executed.len();
        let unique: usize = {
            let mut names: Vec<&str> = executed.iter().map(|e| e.reflex_name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            names.len()
        };
        let reflex_diversity = if total == 0 {
            1.0
        } else {
            (unique as f64 / (0.3 * total as f64)).min(1.0)
        };
        let template_diversity = (1.0 - max_emoji_rate).clamp(0.0, 1.0);
        let carapace_freshness = match days_since {
            Some(days) => (1.0 - days as f64 / f64::from(self.stale_days)).max(0.0),
            None => 0.0,
        };
        let overall = ((reflex_diversity + template_diversity + carapace_freshness) / 3.0)
            .clamp(0.0, 1.0);
        HealthScore { reflex_diversity, template_diversity, carapace_freshness, overall }
    }
}

/// Largest share of a single value in a stream, with the value itself.
fn dominant_rate<'a>(values: impl Iterator<Item = &'a str>) -> (f64, String) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return (0.0, String::new());
    }
    let (value, count) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .unwrap_or(("", 0));
    (count as f64 / total as f64, value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_rate_finds_majority() {
        let values = ["a", "a", "a", "b"];
        let (rate, value) = dominant_rate(values.iter().copied());
        assert!((rate - 0.75).abs() < 1e-12);
        assert_eq!(value, "a");
    }

    #[test]
    fn dominant_rate_on_empty_is_zero() {
        let (rate, value) = dominant_rate(std::iter::empty());
        assert_eq!(rate, 0.0);
        assert!(value.is_empty());
    }
}
