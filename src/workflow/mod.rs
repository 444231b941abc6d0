//! User-authored workflow descriptions.
//!
//! A [`WorkflowDescription`] is the JSON document produced by the visual
//! builder. The [`compiler`](crate::compiler) turns it into an executable
//! [`ExecutionGraph`](crate::compiler::ExecutionGraph).

pub mod schema;

pub use schema::{
    EdgeSpec, NodeSpec, RetryPolicy, TriggerChannel, WorkflowDescription, WorkflowMetadata,
    TRIGGER_TYPES,
};
