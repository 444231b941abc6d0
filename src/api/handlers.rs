//! HTTP handlers for validate, compile, execute and log queries.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::TimeProvider;
use crate::compiler::CompileIssue;
use crate::engine::{CancelToken, ExecutionOptions, ExecutionState, NodeExecutionResult};
use crate::error::{NodeError, WorkflowError};
use crate::log::{LogQuery, LogStore};
use crate::runtime::Runtime;
use crate::workflow::WorkflowDescription;

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: Vec<CompileIssue>,
    pub warnings: Vec<CompileIssue>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Value>,
    pub errors: Vec<CompileIssue>,
    pub warnings: Vec<CompileIssue>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub workflow: WorkflowDescription,
    #[serde(default)]
    pub trigger_payload: Map<String, Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub options: Option<ExecutionOptions>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    pub node_results: Vec<NodeExecutionResult>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutionsQuery {
    pub workflow_id: Option<Uuid>,
    pub state: Option<String>,
    pub started_at_from: Option<i64>,
    pub started_at_to: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn validate(
    State(runtime): State<Arc<Runtime>>,
    Json(desc): Json<WorkflowDescription>,
) -> Json<ValidateResponse> {
    match runtime.compiler.compile(&desc) {
        Ok(compiled) => Json(ValidateResponse {
            valid: true,
            errors: Vec::new(),
            warnings: compiled.warnings,
        }),
        Err(report) => Json(ValidateResponse {
            valid: false,
            errors: report.errors,
            warnings: report.warnings,
        }),
    }
}

pub async fn compile(
    State(runtime): State<Arc<Runtime>>,
    Json(desc): Json<WorkflowDescription>,
) -> Response {
    match runtime.compile(&desc) {
        Ok(compiled) => Json(CompileResponse {
            success: true,
            graph: Some(compiled.graph.summary()),
            errors: Vec::new(),
            warnings: compiled.warnings,
        })
        .into_response(),
        Err(report) => (
            StatusCode::BAD_REQUEST,
            Json(CompileResponse {
                success: false,
                graph: None,
                errors: report.errors,
                warnings: report.warnings,
            }),
        )
            .into_response(),
    }
}

pub async fn execute(
    State(runtime): State<Arc<Runtime>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let options = request.options.unwrap_or_default();
    let result = runtime
        .execute(
            &request.workflow,
            request.trigger_payload,
            request.session_id,
            options,
            CancelToken::none(),
        )
        .await;
    match result {
        Ok(result) => Json(ExecuteResponse {
            execution_id: result.execution_id,
            status: result.status,
            output: result.output,
            error: result.error,
            node_results: result.node_results,
            duration_ms: result.duration_ms,
            session_id: result.session_id,
        })
        .into_response(),
        Err(WorkflowError::CompileFailed(report)) => (
            StatusCode::BAD_REQUEST,
            Json(CompileResponse {
                success: false,
                graph: None,
                errors: report.errors,
                warnings: report.warnings,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn get_execution(
    State(runtime): State<Arc<Runtime>>,
    Path(execution_id): Path<String>,
) -> Response {
    match runtime.logs.get(&execution_id).await {
        Some(log) => Json(log).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "not_found".to_string(),
                message: format!("no execution {execution_id}"),
            }),
        )
            .into_response(),
    }
}

pub async fn list_executions(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<ExecutionsQuery>,
) -> Response {
    let state = match query.state.as_deref() {
        None => None,
        Some(raw) => match serde_json::from_value::<ExecutionState>(Value::String(raw.to_string()))
        {
            Ok(state) => Some(state),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody {
                        error: "invalid_query".to_string(),
                        message: format!("unknown state: {raw}"),
                    }),
                )
                    .into_response();
            }
        },
    };
    let executions = runtime
        .logs
        .query(LogQuery {
            workflow_id: query.workflow_id,
            state,
            started_at_from: query.started_at_from,
            started_at_to: query.started_at_to,
            limit: query.limit,
        })
        .await;
    Json(serde_json::json!({ "executions": executions })).into_response()
}

pub async fn health(State(runtime): State<Arc<Runtime>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": runtime.time.now_millis(),
    }))
}

fn error_response(err: WorkflowError) -> Response {
    let status = match &err {
        WorkflowError::SessionRequired | WorkflowError::SessionConflict { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response()
}
