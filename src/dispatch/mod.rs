//! Action dispatch.
//!
//! The engine never switches on node type; it asks the
//! [`DispatcherRegistry`] for the node's [`ActionHandler`]. That makes
//! the handler set the seam for swapping the telecom backend and for
//! injecting fakes in tests.

pub mod actions;
pub mod logic;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::clock::TimeProvider;
use crate::compiler::ExecutionNode;
use crate::engine::context::CancelToken;
use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
use crate::provider::TelecomProvider;
use crate::session::{SessionRecord, SessionStore};

/// Everything a handler may see for one node execution.
pub struct HandlerContext<'a> {
    pub execution_id: &'a str,
    pub node: &'a ExecutionNode,
    /// Template scope: context variables overlaid with the node input.
    pub scope: &'a Map<String, Value>,
    /// Assembled input from live inbound edges.
    pub input: &'a Map<String, Value>,
    /// Ordered predecessor outputs; only populated for multi-input nodes.
    pub branches: &'a [Map<String, Value>],
    pub session: Option<&'a SessionRecord>,
    pub deadline: Instant,
    pub cancel: &'a CancelToken,
}

impl HandlerContext<'_> {
    /// The session, or a `session_required` validation error.
    pub fn require_session(&self) -> NodeResult<&SessionRecord> {
        self.session
            .ok_or_else(|| NodeError::validation("session_required", "node requires a session"))
    }

    /// The session, which additionally must be on the voice channel.
    pub fn require_voice_session(&self) -> NodeResult<&SessionRecord> {
        let session = self.require_session()?;
        if session.channel != crate::session::Channel::Voice {
            return Err(NodeError::validation(
                "voice_session_required",
                format!("node requires a voice session, got {}", session.channel),
            ));
        }
        Ok(session)
    }
}

/// What a handler produced: an output map plus the chosen output handle.
/// The handle drives conditional routing of outgoing edges.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub output: Map<String, Value>,
    pub handle: String,
}

impl HandlerOutput {
    pub fn success(output: Map<String, Value>) -> Self {
        HandlerOutput {
            output,
            handle: "success".to_string(),
        }
    }

    pub fn with_handle(output: Map<String, Value>, handle: &str) -> Self {
        HandlerOutput {
            output,
            handle: handle.to_string(),
        }
    }
}

/// Executes one node given its configuration and the invocation context.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput>;
}

/// Map from node type to handler.
pub struct DispatcherRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl DispatcherRegistry {
    pub fn empty() -> Self {
        DispatcherRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every builtin handler wired to the given backends.
    pub fn with_builtins(
        provider: Arc<dyn TelecomProvider>,
        sessions: Arc<dyn SessionStore>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let mut registry = DispatcherRegistry::empty();
        logic::register(&mut registry, time);
        state::register(&mut registry, provider.clone(), sessions);
        actions::register(&mut registry, provider);
        registry
    }

    pub fn register(
        &mut self,
        node_type: &str,
        handler: Arc<dyn ActionHandler>,
    ) -> WorkflowResult<()> {
        if self.handlers.contains_key(node_type) {
            return Err(WorkflowError::HandlerAlreadyRegistered(node_type.to_string()));
        }
        self.handlers.insert(node_type.to_string(), handler);
        Ok(())
    }

    /// Swap in a replacement handler (tests use this to fake one type).
    pub fn replace(&mut self, node_type: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(node_type.to_string(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(node_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemTimeProvider;
    use crate::provider::MockTelecomProvider;
    use crate::session::InMemorySessionStore;
    use crate::clock::UuidGenerator;

    #[test]
    fn builtins_cover_every_executable_type() {
        let registry = DispatcherRegistry::with_builtins(
            Arc::new(MockTelecomProvider::new()),
            Arc::new(InMemorySessionStore::new(
                Arc::new(SystemTimeProvider),
                Arc::new(UuidGenerator),
            )),
            Arc::new(SystemTimeProvider),
        );
        for node_type in [
            "send_sms",
            "send_ussd_response",
            "initiate_call",
            "play_ivr",
            "collect_dtmf",
            "request_payment",
            "refund_payment",
            "http_request",
            "condition",
            "switch",
            "delay",
            "retry",
            "rate_limit",
            "merge",
            "session_read",
            "session_write",
            "session_end",
        ] {
            assert!(registry.get(node_type).is_some(), "missing {node_type}");
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = DispatcherRegistry::empty();
        struct Nop;
        #[async_trait]
        impl ActionHandler for Nop {
            async fn execute(&self, _ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
                Ok(HandlerOutput::success(Map::new()))
            }
        }
        registry.register("x", Arc::new(Nop)).unwrap();
        assert!(registry.register("x", Arc::new(Nop)).is_err());
    }
}
