//! Workflow-level error types.

use thiserror::Error;

use super::NodeError;
use crate::compiler::CompileReport;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Compilation failed")]
    CompileFailed(Box<CompileReport>),
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("No handler registered for node type: {0}")]
    HandlerNotFound(String),
    #[error("Handler already registered for node type: {0}")]
    HandlerAlreadyRegistered(String),
    #[error("Node type already registered: {0}")]
    NodeTypeAlreadyRegistered(String),
    #[error("Execution timeout")]
    ExecutionTimeout,
    #[error("Session required but none attached")]
    SessionRequired,
    #[error("Active session already exists for {subscriber} on {channel}")]
    SessionConflict { subscriber: String, channel: String },
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Invalid cron expression: {0}")]
    InvalidCronExpression(String),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError { node_id: String, error: NodeError },
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    /// Stable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::CompileFailed(_) => "schema_validation_error",
            WorkflowError::WorkflowNotFound(_) => "workflow_not_found",
            WorkflowError::NodeNotFound(_) => "node_not_found",
            WorkflowError::HandlerNotFound(_) => "unknown_node_type",
            WorkflowError::HandlerAlreadyRegistered(_) => "handler_already_registered",
            WorkflowError::NodeTypeAlreadyRegistered(_) => "node_type_already_registered",
            WorkflowError::ExecutionTimeout => "execution_timeout",
            WorkflowError::SessionRequired => "session_required",
            WorkflowError::SessionConflict { .. } => "session_conflict",
            WorkflowError::SessionNotFound(_) => "session_not_found",
            WorkflowError::InvalidCronExpression(_) => "invalid_cron_expression",
            WorkflowError::NodeExecutionError { .. } => "node_execution_error",
            WorkflowError::InternalError(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            WorkflowError::WorkflowNotFound("w1".into()).to_string(),
            "Workflow not found: w1"
        );
        assert_eq!(
            WorkflowError::HandlerNotFound("send_fax".into()).to_string(),
            "No handler registered for node type: send_fax"
        );
        assert_eq!(
            WorkflowError::ExecutionTimeout.to_string(),
            "Execution timeout"
        );
        assert_eq!(WorkflowError::ExecutionTimeout.code(), "execution_timeout");
    }

    #[test]
    fn node_execution_error_carries_node() {
        let err = WorkflowError::NodeExecutionError {
            node_id: "n1".into(),
            error: NodeError::transient("network_error", "reset"),
        };
        assert!(err.to_string().contains("n1"));
        assert_eq!(err.code(), "node_execution_error");
    }
}
