//! Builtin state handlers backed by the session store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ActionHandler, DispatcherRegistry, HandlerContext, HandlerOutput};
use crate::error::{NodeError, NodeResult};
use crate::provider::{TelecomProvider, UssdReply};
use crate::session::{Channel, SessionStore};
use crate::template;

pub(super) fn register(
    registry: &mut DispatcherRegistry,
    provider: Arc<dyn TelecomProvider>,
    sessions: Arc<dyn SessionStore>,
) {
    registry
        .register(
            "session_read",
            Arc::new(SessionReadHandler {
                sessions: sessions.clone(),
            }),
        )
        .expect("builtin types are registered once");
    registry
        .register(
            "session_write",
            Arc::new(SessionWriteHandler {
                sessions: sessions.clone(),
            }),
        )
        .expect("once");
    registry
        .register(
            "session_end",
            Arc::new(SessionEndHandler { provider, sessions }),
        )
        .expect("once");
}

fn map_store_error(err: crate::error::WorkflowError) -> NodeError {
    NodeError::permanent(err.code(), err.to_string())
}

/// Projects session data keys into the node output.
pub struct SessionReadHandler {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl ActionHandler for SessionReadHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session_id = ctx.require_session()?.session_id.clone();
        let record = self
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| NodeError::permanent("session_not_found", "session has gone away"))?;
        let keys: Option<Vec<String>> = ctx
            .node
            .config
            .get("keys")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?;
        let output: Map<String, Value> = match keys {
            Some(keys) => keys
                .into_iter()
                .filter_map(|k| record.data.get(&k).map(|v| (k, v.clone())))
                .collect(),
            None => record.data.clone(),
        };
        self.sessions.touch(&session_id).await;
        Ok(HandlerOutput::success(output))
    }
}

/// Writes rendered template values into the session data.
pub struct SessionWriteHandler {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl ActionHandler for SessionWriteHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session_id = ctx.require_session()?.session_id.clone();
        let data = ctx
            .node
            .config
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                NodeError::validation("node_config_validation_error", "missing data map")
            })?;
        let rendered = template::render_map(data, ctx.scope);
        let merge = ctx
            .node
            .config
            .get("merge")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let record = if merge {
            self.sessions.update_data(&session_id, rendered.clone()).await
        } else {
            self.sessions.replace_data(&session_id, rendered.clone()).await
        }
        .map_err(map_store_error)?;
        debug_assert!(record.active);
        Ok(HandlerOutput::success(rendered))
    }
}

/// Marks the session inactive; an optional farewell message goes out on
/// the USSD channel first.
pub struct SessionEndHandler {
    provider: Arc<dyn TelecomProvider>,
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl ActionHandler for SessionEndHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let session = ctx.require_session()?;
        let session_id = session.session_id.clone();
        if let Some(message) = ctx.node.config.get("message").and_then(Value::as_str) {
            if session.channel == Channel::Ussd {
                let reply = UssdReply {
                    session_id: session_id.clone(),
                    message: template::render(message, ctx.scope),
                    expect_input: false,
                };
                self.provider
                    .send_ussd_response(reply)
                    .await
                    .map_err(|e| e.into_node_error("ussd_response_error"))?;
            }
        }
        self.sessions.end(&session_id).await.map_err(map_store_error)?;
        let mut output = Map::new();
        output.insert("session_id".to_string(), Value::String(session_id));
        output.insert("ended".to_string(), Value::Bool(true));
        Ok(HandlerOutput::success(output))
    }
}
