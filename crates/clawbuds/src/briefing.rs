//! Briefing and micro-molt suggestions.
//!
//! Briefing-time analysis over execution history, routing outcomes and the
//! staleness report. It yields at most three actionable suggestions per
//! run; applying one delegates to an external carapace editor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::model::{DunbarLayer, ExecutionResult};
use crate::notifier::{AgentNotifier, AgentTrigger, TriggerKind};
use crate::reflex::builtins::names;
use crate::staleness::{AlertKind, StalenessDetector};
use crate::storage::Storage;

/// Suggestions emitted per briefing, at most.
const MAX_SUGGESTIONS: usize = 3;

/// One actionable micro-molt suggestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoltSuggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub cli_command: String,
    pub confidence: f64,
}

/// External editor applying a suggestion to the owner's carapace.
#[async_trait]
pub trait CarapaceEditor: Send + Sync {
    async fn apply(&self, owner: &str, suggestion: &MoltSuggestion) -> Result<()>;
}

/// Suggestion synthesis and briefing delivery.
pub struct BriefingService {
    storage: Storage,
    clock: SharedClock,
    staleness: Arc<StalenessDetector>,
    notifier: Arc<dyn AgentNotifier>,
    editor: RwLock<Option<Arc<dyn CarapaceEditor>>>,
}

impl BriefingService {
    pub fn new(
        storage: Storage,
        clock: SharedClock,
        staleness: Arc<StalenessDetector>,
        notifier: Arc<dyn AgentNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self { storage, clock, staleness, notifier, editor: RwLock::new(None) })
    }

    pub fn attach_editor(&self, editor: Arc<dyn CarapaceEditor>) {
        *self.editor.write() = Some(editor);
    }

    pub fn editor_attached(&self) -> bool {
        self.editor.read().is_some()
    }

    /// Synthesize up to three suggestions across six analytical dimensions:
    /// reflex effectiveness, grooming reply rate, routing endorsement rate,
    /// Dunbar layer strategy, monotony alerts and carapace staleness.
    pub async fn micro_molt_suggestions(&self, owner: &str) -> Result<Vec<MoltSuggestion>> {
        let since = self.clock.now() - Duration::days(30);
        let executions = self.storage.executions.find_recent(owner, since).await?;
        let report = self.staleness.report(owner).await?;
        let mut suggestions = Vec::new();

        // Reflex effectiveness: a high blocked share means reflexes fight
        // the hourly budget instead of doing useful work.
        let total = executions.len();
        let blocked =
            executions.iter().filter(|e| e.result == ExecutionResult::Blocked).count();
        if total >= 10 && blocked as f64 / total as f64 >= 0.2 {
            suggestions.push(MoltSuggestion {
                kind: "reflex_effectiveness".to_string(),
                description: format!(
                    "{blocked} of {total} recent executions were rate-limited; consider disabling noisy reflexes"
                ),
                cli_command: "clawbuds reflex list --sort executions".to_string(),
                confidence: 0.7,
            });
        }

        // Grooming reply rate: drafts that never come back acknowledged.
        let groom_dispatched = executions
            .iter()
            .filter(|e| {
                e.reflex_name == names::DRAFT_GROOM_REPLY
                    && e.result == ExecutionResult::DispatchedToL1
            })
            .count();
        let groom_acked = executions
            .iter()
            .filter(|e| {
                e.reflex_name == names::DRAFT_GROOM_REPLY
                    && e.result == ExecutionResult::L1Acknowledged
            })
            .count();
        if groom_dispatched >= 5 && groom_acked * 2 < groom_dispatched {
            suggestions.push(MoltSuggestion {
                kind: "groom_reply_rate".to_string(),
                description: format!(
                    "only {groom_acked} of {groom_dispatched} groom drafts were picked up; revisit grooming cadence"
                ),
                cli_command: "clawbuds reflex show draft_groom_reply".to_string(),
                confidence: 0.6,
            });
        }

        // Routing endorsement rate: pearls leave, nothing comes back.
        let routed = executions
            .iter()
            .filter(|e| {
                e.reflex_name == names::ROUTE_PEARL_BY_INTEREST
                    && matches!(
                        e.result,
                        ExecutionResult::DispatchedToL1 | ExecutionResult::L1Acknowledged
                    )
            })
            .count();
        if routed >= 5 {
            let mut endorsement_total = 0usize;
            for pearl in self.storage.pearls.list_by_owner(owner).await? {
                endorsement_total +=
                    self.storage.pearls.list_endorsements(&pearl.id).await?.len();
            }
            if endorsement_total == 0 {
                suggestions.push(MoltSuggestion {
                    kind: "pearl_routing_endorsement".to_string(),
                    description: format!(
                        "{routed} pearls routed without a single endorsement back; raise trust thresholds or prune tags"
                    ),
                    cli_command: "clawbuds pearl list --shared".to_string(),
                    confidence: 0.65,
                });
            }
        }

        // Dunbar layer strategy: no core relationships at all.
        let strengths = self.storage.strengths.list_from(owner).await?;
        if !strengths.is_empty()
            && !strengths.iter().any(|s| s.layer == DunbarLayer::Core)
        {
            suggestions.push(MoltSuggestion {
                kind: "dunbar_strategy".to_string(),
                description: "no relationship currently sits in the core layer; invest in your closest friends".to_string(),
                cli_command: "clawbuds friends --by-strength".to_string(),
                confidence: 0.55,
            });
        }

        // Monotony and staleness alerts map directly to suggestions.
        for alert in &report.alerts {
            let (kind, cli_command) = match alert.kind {
                AlertKind::EmojiMonotony | AlertKind::GroomPhraseRepetition => {
                    ("monotony".to_string(), "clawbuds carapace edit --section templates".to_string())
                }
                AlertKind::CarapaceStale => {
                    ("carapace_staleness".to_string(), "clawbuds carapace edit".to_string())
                }
                AlertKind::ReflexRepetition => {
                    ("monotony".to_string(), "clawbuds reflex list --sort executions".to_string())
                }
            };
            suggestions.push(MoltSuggestion {
                kind,
                description: alert.description.clone(),
                cli_command,
                confidence: alert.severity.clamp(0.0, 1.0),
            });
        }

        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }

    /// Apply a suggestion through the attached editor.
    pub async fn apply_suggestion(&self, owner: &str, suggestion: &MoltSuggestion) -> Result<()> {
        let editor = self.editor.read().clone();
        match editor {
            Some(editor) => editor.apply(owner, suggestion).await,
            None => Err(CoreError::NotConfigured("no carapace editor attached".into())),
        }
    }

    /// Send a briefing request to the cognitive host. Fire-and-forget.
    pub async fn deliver_briefing(&self, owner: &str) -> Result<Vec<MoltSuggestion>> {
        let suggestions = self.micro_molt_suggestions(owner).await?;
        let trigger = AgentTrigger {
            batch_id: format!("briefing-{owner}"),
            kind: TriggerKind::BriefingRequest,
            message: format!("{} micro-molt suggestion(s)", suggestions.len()),
            items: suggestions
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null))
                .collect(),
        };
        if let Err(err) = self.notifier.trigger_agent(trigger).await {
            warn!(owner, error = %err, "briefing delivery failed");
        }
        Ok(suggestions)
    }
}
