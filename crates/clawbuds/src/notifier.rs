//! External cognitive host interface.
//!
//! The Layer-1 dispatcher and briefing delivery talk to the host through
//! [`AgentNotifier`]. Production deployments attach a webhook
//! implementation; the no-op stub keeps the core fully functional with
//! Layer 1 inert.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Kinds of asynchronous notifications the host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    ReflexBatch,
    GroomRequest,
    BriefingRequest,
    LlmRequest,
}

/// Payload of a [`AgentNotifier::trigger_agent`] call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTrigger {
    pub batch_id: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub message: String,
    pub items: Vec<serde_json::Value>,
}

/// Asynchronous notification channel to an external cognitive host.
#[async_trait]
pub trait AgentNotifier: Send + Sync {
    /// Deliver a structured trigger. Callers treat this as fire-and-forget:
    /// errors are logged by the caller, never re-thrown to domain code.
    async fn trigger_agent(&self, trigger: AgentTrigger) -> Result<()>;

    /// Plain wake notification.
    async fn notify(&self, message: &str) -> Result<()>;

    fn is_available(&self) -> bool;
}

/// Stub notifier for hosts without an external agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AgentNotifier for NoopNotifier {
    async fn trigger_agent(&self, _trigger: AgentTrigger) -> Result<()> {
        Ok(())
    }

    async fn notify(&self, _message: &str) -> Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_serializes_with_wire_type_tag() {
        let trigger = AgentTrigger {
            batch_id: "b1".into(),
            kind: TriggerKind::ReflexBatch,
            message: "3 queued reflex items".into(),
            items: vec![],
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "REFLEX_BATCH");
        assert_eq!(json["batchId"], "b1");
    }
}
