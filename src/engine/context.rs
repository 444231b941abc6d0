//! Per-invocation runtime state and cooperative cancellation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::session::SessionRecord;

/// Mutable state of one invocation. Owned exclusively by the engine and
/// discarded when the invocation ends; never shared across invocations.
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub trigger_payload: Map<String, Value>,
    pub session: Option<SessionRecord>,
    /// Template-addressable variables: the trigger payload, merged node
    /// outputs, `node_<id>` projections and the `session` view.
    pub variables: Map<String, Value>,
    pub started_at: i64,
}

impl ExecutionContext {
    /// Refresh the `session` variable from the current session snapshot.
    pub fn sync_session_variable(&mut self) {
        if let Some(session) = &self.session {
            self.variables
                .insert("session".to_string(), session.as_variable());
        }
    }
}

/// Caller-supplied execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default = "default_max_execution_ms")]
    pub max_execution_ms: u64,
    #[serde(default = "default_enable_retries")]
    pub enable_retries: bool,
    #[serde(default)]
    pub resumable: bool,
}

fn default_max_execution_ms() -> u64 {
    300_000
}
fn default_enable_retries() -> bool {
    true
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions {
            max_execution_ms: default_max_execution_ms(),
            enable_retries: default_enable_retries(),
            resumable: false,
        }
    }
}

/// Signals cancellation into a running invocation.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token checked between nodes and at every
/// suspension point.
#[derive(Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn none() -> Self {
        CancelToken { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve when cancellation fires; pends forever on a `none` token
    /// or after the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending::<()>().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}
