//! Error types for the orchestration engine.
//!
//! - [`NodeError`] — structured errors raised while executing a single node.
//! - [`WorkflowError`] — top-level errors for compiling and running workflows.

pub mod node_error;
pub mod workflow_error;

pub use node_error::{ErrorKind, NodeError};
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
