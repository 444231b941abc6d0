use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Node types that may appear as a workflow trigger.
pub const TRIGGER_TYPES: &[&str] = &[
    "sms_received",
    "ussd_session_start",
    "incoming_call",
    "payment_callback",
    "scheduled",
    "http_webhook",
];

/// Workflow identity and authorship metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub id: Uuid,
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// A single step in a workflow description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, alias = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Per-node retry policy. Delays follow
/// `min(initial_delay_ms * backoff_multiplier^(attempt-1), max_delay_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// When set, only these error codes are retried; otherwise retry
    /// eligibility follows the error kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_errors: Option<Vec<String>>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay(),
            retryable_errors: None,
        }
    }
}

impl RetryPolicy {
    /// Whether this policy retries the given error. Permanent and
    /// validation failures never retry; a `retryable_errors` list
    /// restricts eligibility to the named codes, otherwise the error
    /// kind decides.
    pub fn allows_retry_of(&self, error: &crate::error::NodeError) -> bool {
        if !error.kind.is_retryable() {
            return false;
        }
        match &self.retryable_errors {
            Some(codes) => codes.iter().any(|c| c == &error.code),
            None => true,
        }
    }

    /// Back-off before attempt `attempt` (1-based; attempt 0 never sleeps).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let multiplied =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        (multiplied as u64).min(self.max_delay_ms)
    }
}

/// The interaction channel a trigger type binds a workflow to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerChannel {
    Ussd,
    Voice,
    Sms,
    Payment,
}

/// The complete user-authored workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub metadata: WorkflowMetadata,
    /// Id of the trigger node; must also appear in `nodes`.
    pub trigger: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl WorkflowDescription {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn trigger_node(&self) -> Option<&NodeSpec> {
        self.node(&self.trigger)
    }

    /// Channel implied by the trigger type, when the trigger opens one.
    pub fn trigger_channel(&self) -> Option<TriggerChannel> {
        match self.trigger_node()?.node_type.as_str() {
            "ussd_session_start" => Some(TriggerChannel::Ussd),
            "incoming_call" => Some(TriggerChannel::Voice),
            "sms_received" => Some(TriggerChannel::Sms),
            "payment_callback" => Some(TriggerChannel::Payment),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal(trigger_type: &str) -> WorkflowDescription {
        serde_json::from_value(json!({
            "metadata": {
                "id": "7b1c6a4e-3f2d-4e8a-9c0b-1d2e3f4a5b6c",
                "version": 1,
                "name": "t"
            },
            "trigger": "t1",
            "nodes": [{"id": "t1", "type": trigger_type}],
            "edges": []
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_minimal_description() {
        let wf = minimal("sms_received");
        assert_eq!(wf.metadata.version, 1);
        assert_eq!(wf.trigger_node().unwrap().node_type, "sms_received");
        assert_eq!(wf.trigger_channel(), Some(TriggerChannel::Sms));
    }

    #[test]
    fn retry_policy_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 10.0,
            max_delay_ms: 2_500,
            retryable_errors: None,
        };
        assert_eq!(policy.delay_ms(0), 0);
        assert_eq!(policy.delay_ms(1), 100);
        assert_eq!(policy.delay_ms(2), 1_000);
        assert_eq!(policy.delay_ms(3), 2_500);
        assert_eq!(policy.delay_ms(4), 2_500);
    }

    #[test]
    fn edge_accepts_react_flow_aliases() {
        let edge: EdgeSpec = serde_json::from_value(json!({
            "id": "e1",
            "source": "a",
            "target": "b",
            "sourceHandle": "true"
        }))
        .unwrap();
        assert_eq!(edge.source_handle.as_deref(), Some("true"));
    }

    #[test]
    fn trigger_channel_for_session_channels() {
        assert_eq!(
            minimal("ussd_session_start").trigger_channel(),
            Some(TriggerChannel::Ussd)
        );
        assert_eq!(
            minimal("incoming_call").trigger_channel(),
            Some(TriggerChannel::Voice)
        );
        assert_eq!(minimal("scheduled").trigger_channel(), None);
    }
}
