//! Workflow orchestration engine for telecom channels.
//!
//! Compiles declarative workflow descriptions into executable DAGs and
//! runs them in response to external events: inbound SMS, USSD sessions,
//! voice calls, payment callbacks, schedules and HTTP webhooks.
//!
//! The three load-bearing subsystems:
//!
//! - [`compiler`] — validates a description against the [`catalog`] and
//!   produces a topologically ordered [`ExecutionGraph`].
//! - [`engine`] — drives one invocation of that graph with per-node
//!   retry/timeout, variable propagation and conditional branching.
//! - [`session`] — keyed interaction state with TTL for multi-turn
//!   channels (USSD, voice).

pub mod api;
pub mod catalog;
pub mod clock;
pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod log;
pub mod provider;
pub mod runtime;
pub mod session;
pub mod store;
pub mod template;
pub mod workflow;

pub use crate::catalog::{NodeCatalog, NodeCatalogEntry, NodeCategory};
pub use crate::clock::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, SystemTimeProvider, TimeProvider,
    UuidGenerator,
};
pub use crate::compiler::{
    CompileCache, CompileIssue, CompileReport, Compiled, ExecutionGraph, WorkflowCompiler,
};
pub use crate::config::Config;
pub use crate::dispatch::{ActionHandler, DispatcherRegistry, HandlerContext, HandlerOutput};
pub use crate::engine::{
    cancel_pair, CancelHandle, CancelToken, ExecutionEngine, ExecutionOptions, ExecutionResult,
    ExecutionState, NodeExecutionResult, NodeStatus,
};
pub use crate::error::{ErrorKind, NodeError, NodeResult, WorkflowError, WorkflowResult};
pub use crate::log::{ExecutionLog, InMemoryLogStore, LogQuery, LogStore};
pub use crate::provider::{MockTelecomProvider, TelecomProvider};
pub use crate::runtime::{Runtime, RuntimeBuilder};
pub use crate::session::{Channel, InMemorySessionStore, SessionRecord, SessionStore};
pub use crate::store::{InMemoryWorkflowRepository, WorkflowRepository};
pub use crate::workflow::{RetryPolicy, WorkflowDescription};
