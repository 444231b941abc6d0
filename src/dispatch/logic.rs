//! Builtin logic handlers: condition, switch, delay, retry gate,
//! rate limit and merge.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{ActionHandler, DispatcherRegistry, HandlerContext, HandlerOutput};
use crate::clock::TimeProvider;
use crate::error::{NodeError, NodeResult};
use crate::template;

pub(super) fn register(registry: &mut DispatcherRegistry, time: Arc<dyn TimeProvider>) {
    registry
        .register("condition", Arc::new(ConditionHandler))
        .expect("builtin types are registered once");
    registry.register("switch", Arc::new(SwitchHandler)).expect("once");
    registry.register("delay", Arc::new(DelayHandler)).expect("once");
    registry.register("retry", Arc::new(RetryGateHandler)).expect("once");
    registry
        .register("rate_limit", Arc::new(RateLimitHandler::new(time)))
        .expect("once");
    registry.register("merge", Arc::new(MergeHandler)).expect("once");
}

fn config_str<'a>(config: &'a Map<String, Value>, key: &str) -> NodeResult<&'a str> {
    config.get(key).and_then(Value::as_str).ok_or_else(|| {
        NodeError::validation(
            "node_config_validation_error",
            format!("missing string field: {key}"),
        )
    })
}

/// Routes the input unchanged down the `true` or `false` branch.
pub struct ConditionHandler;

#[async_trait]
impl ActionHandler for ConditionHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let expression = config_str(&ctx.node.config, "expression")?;
        let branch = template::evaluate_predicate(expression, ctx.scope);
        Ok(HandlerOutput::with_handle(
            ctx.input.clone(),
            if branch { "true" } else { "false" },
        ))
    }
}

#[derive(Deserialize)]
struct SwitchCase {
    value: String,
    #[serde(default)]
    label: Option<String>,
}

/// Routes to the matching case handle, else `default`.
pub struct SwitchHandler;

#[async_trait]
impl ActionHandler for SwitchHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let value = template::render(config_str(&ctx.node.config, "value")?, ctx.scope);
        let cases: Vec<SwitchCase> = ctx
            .node
            .config
            .get("cases")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let handle = cases
            .iter()
            .find(|case| case.value == value)
            .map(|case| {
                case.label
                    .as_deref()
                    .filter(|l| !l.is_empty())
                    .unwrap_or(&case.value)
                    .to_string()
            })
            .unwrap_or_else(|| "default".to_string());
        Ok(HandlerOutput::with_handle(ctx.input.clone(), &handle))
    }
}

/// Passes the input through after `duration_ms`, bounded by the
/// invocation deadline and the cancellation token.
pub struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let duration_ms = ctx
            .node
            .config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let wanted = Duration::from_millis(duration_ms);
        let remaining = ctx.deadline.saturating_duration_since(Instant::now());
        let truncated = wanted > remaining;
        let sleep_for = wanted.min(remaining);

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = ctx.cancel.cancelled() => {
                return Err(NodeError::transient("cancelled", "invocation cancelled during delay"));
            }
        }
        if truncated {
            return Err(NodeError::timeout(format!(
                "delay of {duration_ms}ms exceeds the invocation deadline"
            )));
        }
        Ok(HandlerOutput::success(ctx.input.clone()))
    }
}

/// Policy wrapper sitting downstream of error branches: routes to
/// `max_retries` when its input carries an unrecovered error, else passes
/// through on `success`.
pub struct RetryGateHandler;

#[async_trait]
impl ActionHandler for RetryGateHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let exhausted = ctx.input.get("error").map(|e| !e.is_null()).unwrap_or(false);
        Ok(HandlerOutput::with_handle(
            ctx.input.clone(),
            if exhausted { "max_retries" } else { "success" },
        ))
    }
}

enum Window {
    Fixed { start: i64, count: u32 },
    Sliding(VecDeque<i64>),
}

/// Counts invocations per key across executions; overflow is a
/// `rate_limit` error, retryable once the window moves on.
pub struct RateLimitHandler {
    time: Arc<dyn TimeProvider>,
    windows: DashMap<String, Window>,
}

impl RateLimitHandler {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        RateLimitHandler {
            time,
            windows: DashMap::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for RateLimitHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let config = &ctx.node.config;
        let max_requests = config.get("max_requests").and_then(Value::as_u64).unwrap_or(1) as u32;
        let window_ms = config.get("window_ms").and_then(Value::as_i64).unwrap_or(1);
        let sliding = config.get("strategy").and_then(Value::as_str) == Some("sliding");
        let key = config
            .get("key")
            .and_then(Value::as_str)
            .map(|k| template::render(k, ctx.scope))
            .unwrap_or_else(|| ctx.node.id.clone());

        let now = self.time.now_millis();
        let mut entry = self.windows.entry(key).or_insert_with(|| {
            if sliding {
                Window::Sliding(VecDeque::new())
            } else {
                Window::Fixed { start: now, count: 0 }
            }
        });
        let allowed = match entry.value_mut() {
            Window::Fixed { start, count } => {
                if now - *start >= window_ms {
                    *start = now;
                    *count = 0;
                }
                if *count < max_requests {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
            Window::Sliding(hits) => {
                while hits.front().is_some_and(|ts| *ts <= now - window_ms) {
                    hits.pop_front();
                }
                if (hits.len() as u32) < max_requests {
                    hits.push_back(now);
                    true
                } else {
                    false
                }
            }
        };
        if allowed {
            Ok(HandlerOutput::success(ctx.input.clone()))
        } else {
            Err(NodeError::rate_limit(format!(
                "exceeded {max_requests} requests per {window_ms}ms"
            )))
        }
    }
}

/// Combines buffered predecessor outputs. The engine guarantees every
/// configured inbound edge produced a result (or was skipped) before
/// this runs.
pub struct MergeHandler;

#[async_trait]
impl ActionHandler for MergeHandler {
    async fn execute(&self, ctx: HandlerContext<'_>) -> NodeResult<HandlerOutput> {
        let strategy = ctx
            .node
            .config
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("merge");
        let output = match strategy {
            "first" => ctx
                .branches
                .iter()
                .find(|b| !b.is_empty())
                .cloned()
                .unwrap_or_default(),
            "last" => ctx
                .branches
                .iter()
                .rev()
                .find(|b| !b.is_empty())
                .cloned()
                .unwrap_or_default(),
            "all" => {
                let mut out = Map::new();
                out.insert(
                    "branches".to_string(),
                    Value::Array(
                        ctx.branches
                            .iter()
                            .map(|b| Value::Object(b.clone()))
                            .collect(),
                    ),
                );
                out
            }
            _ => {
                let mut out = Map::new();
                for branch in ctx.branches {
                    for (k, v) in branch {
                        out.insert(k.clone(), v.clone());
                    }
                }
                out
            }
        };
        Ok(HandlerOutput::success(output))
    }
}
