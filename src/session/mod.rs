//! Interaction sessions for multi-turn channels (USSD, voice).
//!
//! A session survives across invocations of the same workflow for a
//! subscriber; the store guarantees at most one active session per
//! `(subscriber, channel)` pair and expires idle records by TTL.

pub mod memory;

pub use memory::InMemorySessionStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowResult;

/// The channel a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Ussd,
    Voice,
    Sms,
    Payment,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Ussd => "ussd",
            Channel::Voice => "voice",
            Channel::Sms => "sms",
            Channel::Payment => "payment",
        };
        f.write_str(s)
    }
}

impl From<crate::workflow::TriggerChannel> for Channel {
    fn from(value: crate::workflow::TriggerChannel) -> Self {
        match value {
            crate::workflow::TriggerChannel::Ussd => Channel::Ussd,
            crate::workflow::TriggerChannel::Voice => Channel::Voice,
            crate::workflow::TriggerChannel::Sms => Channel::Sms,
            crate::workflow::TriggerChannel::Payment => Channel::Payment,
        }
    }
}

/// One interaction session. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub channel: Channel,
    pub subscriber: String,
    pub data: Map<String, Value>,
    pub created_at: i64,
    pub last_activity_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub active: bool,
}

impl SessionRecord {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_millis)
    }

    /// JSON view exposed to templates as the `session` variable.
    pub fn as_variable(&self) -> Value {
        serde_json::json!({
            "session_id": self.session_id,
            "channel": self.channel,
            "subscriber": self.subscriber,
            "data": Value::Object(self.data.clone()),
        })
    }
}

/// Keyed store of interaction state.
///
/// Every method is a single linearization point with respect to other
/// calls on the same `session_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and index it by `(subscriber, channel)`. Fails
    /// with `session_conflict` when an active record is already indexed.
    async fn create(
        &self,
        channel: Channel,
        subscriber: &str,
        initial_data: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> WorkflowResult<SessionRecord>;

    /// Create a session with a caller-supplied id (USSD gateways and
    /// voice bridges assign their own session identifiers).
    async fn create_with_id(
        &self,
        session_id: &str,
        channel: Channel,
        subscriber: &str,
        initial_data: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> WorkflowResult<SessionRecord>;

    /// `None` for missing, inactive or expired records. Expired records
    /// are transitioned to inactive before returning.
    async fn get(&self, session_id: &str) -> Option<SessionRecord>;

    async fn find_active(&self, subscriber: &str, channel: Channel) -> Option<SessionRecord>;

    /// Merge `partial_data` into the session data (incoming keys win)
    /// and refresh `last_activity_at`.
    async fn update_data(
        &self,
        session_id: &str,
        partial_data: Map<String, Value>,
    ) -> WorkflowResult<SessionRecord>;

    /// Replace the session data wholesale. Same liveness rules as
    /// [`update_data`](Self::update_data).
    async fn replace_data(
        &self,
        session_id: &str,
        data: Map<String, Value>,
    ) -> WorkflowResult<SessionRecord>;

    /// Refresh `last_activity_at` only. No effect on inactive sessions.
    async fn touch(&self, session_id: &str);

    /// Mark inactive and drop the secondary index entry.
    async fn end(&self, session_id: &str) -> WorkflowResult<()>;

    /// End every expired active record; returns how many were ended.
    async fn sweep(&self) -> usize;
}
