//! Background tasks: the scheduled-trigger ticker and the session
//! sweeper.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::TimeProvider;
use crate::engine::{CancelToken, ExecutionOptions};
use crate::error::{WorkflowError, WorkflowResult};
use crate::runtime::Runtime;
use crate::session::SessionStore;
use crate::store::WorkflowRepository;

/// First fire time strictly after `after`, or an error for a malformed
/// expression. Five-field expressions get a seconds field prefixed, as
/// the parser always expects one.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> WorkflowResult<Option<DateTime<Utc>>> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| WorkflowError::InvalidCronExpression(e.to_string()))?;
    Ok(schedule.after(&after).next())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Once per tick, fire every registered `scheduled` workflow whose cron
/// expression matched inside the elapsed window.
pub fn spawn_scheduler(runtime: Arc<Runtime>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so the window
        // starts now.
        interval.tick().await;
        let mut window_start = millis_to_utc(runtime.time.now_millis());

        loop {
            interval.tick().await;
            let now = millis_to_utc(runtime.time.now_millis());
            for desc in runtime.workflows.list().await {
                let Some(trigger) = desc.trigger_node() else {
                    continue;
                };
                if trigger.node_type != "scheduled" || trigger.disabled {
                    continue;
                }
                let Some(expr) = trigger.config.get("cron_expression").and_then(Value::as_str)
                else {
                    continue;
                };
                match next_fire(expr, window_start) {
                    Ok(Some(at)) if at <= now => {
                        info!(
                            workflow_id = %desc.metadata.id,
                            fire_at = %at,
                            "firing scheduled workflow"
                        );
                        let mut payload = Map::new();
                        payload.insert(
                            "scheduled_at".to_string(),
                            Value::from(at.timestamp_millis()),
                        );
                        payload.insert(
                            "cron_expression".to_string(),
                            Value::String(expr.to_string()),
                        );
                        let runtime = runtime.clone();
                        tokio::spawn(async move {
                            let outcome = runtime
                                .execute(
                                    &desc,
                                    payload,
                                    None,
                                    ExecutionOptions::default(),
                                    CancelToken::none(),
                                )
                                .await;
                            if let Err(err) = outcome {
                                warn!(
                                    workflow_id = %desc.metadata.id,
                                    error = %err,
                                    "scheduled invocation failed to start"
                                );
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(workflow_id = %desc.metadata.id, error = %err, "bad cron expression");
                    }
                }
            }
            window_start = now;
        }
    })
}

/// Periodically end expired sessions.
pub fn spawn_session_sweeper(runtime: Arc<Runtime>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let swept = runtime.sessions.sweep().await;
            if swept > 0 {
                debug!(count = swept, "swept expired sessions");
            }
        }
    })
}
