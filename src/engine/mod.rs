//! Per-invocation graph execution.

pub mod context;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod result;

pub use context::{cancel_pair, CancelHandle, CancelToken, ExecutionContext, ExecutionOptions};
pub use engine::ExecutionEngine;
pub use result::{ExecutionResult, ExecutionState, NodeExecutionResult, NodeStatus};
