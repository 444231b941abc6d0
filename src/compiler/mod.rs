//! Workflow compiler.
//!
//! Turns a [`WorkflowDescription`](crate::workflow::WorkflowDescription)
//! into a validated, topologically ordered [`ExecutionGraph`]. The
//! compiler has no side effects, which makes compiled graphs safe to
//! cache per `(workflow_id, version)`.

pub mod cache;
pub mod graph;
pub mod pipeline;

pub use cache::CompileCache;
pub use graph::{EdgeRef, ExecutionGraph, ExecutionNode, GraphMetadata};
pub use pipeline::{Compiled, CompileIssue, CompileReport, WorkflowCompiler};
