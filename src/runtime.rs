//! The runtime bundle.
//!
//! Explicit construction instead of process-wide singletons: every entry
//! point receives a [`Runtime`] carrying the catalog, compiler cache,
//! dispatcher, stores, clock and id source, so tests can substitute
//! fakes piecewise through [`RuntimeBuilder`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::catalog::NodeCatalog;
use crate::clock::{IdGenerator, SystemTimeProvider, TimeProvider, UuidGenerator};
use crate::compiler::{Compiled, CompileCache, CompileReport, WorkflowCompiler};
use crate::dispatch::DispatcherRegistry;
use crate::engine::{CancelToken, ExecutionEngine, ExecutionOptions, ExecutionResult};
use crate::error::{WorkflowError, WorkflowResult};
use crate::log::{InMemoryLogStore, LogStore};
use crate::provider::{MockTelecomProvider, TelecomProvider};
use crate::session::{Channel, InMemorySessionStore, SessionRecord, SessionStore};
use crate::store::{InMemoryWorkflowRepository, WorkflowRepository};
use crate::workflow::WorkflowDescription;

pub struct Runtime {
    pub catalog: Arc<NodeCatalog>,
    pub compiler: WorkflowCompiler,
    pub cache: CompileCache,
    pub dispatcher: Arc<DispatcherRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub logs: Arc<dyn LogStore>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub provider: Arc<dyn TelecomProvider>,
    pub time: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdGenerator>,
    pub session_ttl: Option<Duration>,
    engine: ExecutionEngine,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Compile through the cache.
    pub fn compile(&self, desc: &WorkflowDescription) -> Result<Compiled, CompileReport> {
        self.cache.get_or_compile(&self.compiler, desc)
    }

    /// Compile, attach or open a session when the graph needs one, and
    /// run the invocation.
    pub async fn execute(
        &self,
        desc: &WorkflowDescription,
        trigger_payload: Map<String, Value>,
        session_id: Option<String>,
        options: ExecutionOptions,
        cancel: CancelToken,
    ) -> WorkflowResult<ExecutionResult> {
        let compiled = self
            .compile(desc)
            .map_err(|report| WorkflowError::CompileFailed(Box::new(report)))?;
        let graph = compiled.graph;

        let session = if graph.metadata.requires_session {
            Some(
                self.attach_session(desc, &trigger_payload, session_id)
                    .await?,
            )
        } else {
            None
        };

        Ok(self
            .engine
            .execute(graph, trigger_payload, session, options, cancel)
            .await)
    }

    /// Resolve the session for a session-bound invocation: an explicit
    /// id wins, then the active record for `(subscriber, channel)`, then
    /// a fresh session.
    async fn attach_session(
        &self,
        desc: &WorkflowDescription,
        payload: &Map<String, Value>,
        session_id: Option<String>,
    ) -> WorkflowResult<SessionRecord> {
        let channel: Channel = desc
            .trigger_channel()
            .map(Into::into)
            .ok_or(WorkflowError::SessionRequired)?;
        let session_id = session_id.or_else(|| {
            payload
                .get("session_id")
                .or_else(|| payload.get("call_session_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let subscriber = payload
            .get("subscriber")
            .or_else(|| payload.get("caller"))
            .or_else(|| payload.get("phone_number"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(id) = &session_id {
            if let Some(existing) = self.sessions.get(id).await {
                self.sessions.touch(id).await;
                return Ok(existing);
            }
            let subscriber = subscriber.ok_or(WorkflowError::SessionRequired)?;
            return self
                .sessions
                .create_with_id(id, channel, &subscriber, Map::new(), self.session_ttl)
                .await;
        }

        let subscriber = subscriber.ok_or(WorkflowError::SessionRequired)?;
        if let Some(existing) = self.sessions.find_active(&subscriber, channel).await {
            self.sessions.touch(&existing.session_id).await;
            return Ok(existing);
        }
        self.sessions
            .create(channel, &subscriber, Map::new(), self.session_ttl)
            .await
    }
}

/// Assembles a [`Runtime`], defaulting every collaborator to its
/// in-memory implementation and the provider to the recording mock.
#[derive(Default)]
pub struct RuntimeBuilder {
    catalog: Option<Arc<NodeCatalog>>,
    dispatcher: Option<Arc<DispatcherRegistry>>,
    sessions: Option<Arc<dyn SessionStore>>,
    logs: Option<Arc<dyn LogStore>>,
    workflows: Option<Arc<dyn WorkflowRepository>>,
    provider: Option<Arc<dyn TelecomProvider>>,
    time: Option<Arc<dyn TimeProvider>>,
    ids: Option<Arc<dyn IdGenerator>>,
    session_ttl: Option<Duration>,
}

impl RuntimeBuilder {
    pub fn catalog(mut self, catalog: NodeCatalog) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn dispatcher(mut self, dispatcher: DispatcherRegistry) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn logs(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn workflows(mut self, workflows: Arc<dyn WorkflowRepository>) -> Self {
        self.workflows = Some(workflows);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TelecomProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let time = self.time.unwrap_or_else(|| Arc::new(SystemTimeProvider));
        let ids = self.ids.unwrap_or_else(|| Arc::new(UuidGenerator));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(NodeCatalog::with_builtins()));
        let provider: Arc<dyn TelecomProvider> = self
            .provider
            .unwrap_or_else(|| Arc::new(MockTelecomProvider::new()));
        let sessions: Arc<dyn SessionStore> = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new(time.clone(), ids.clone())));
        let logs: Arc<dyn LogStore> = self
            .logs
            .unwrap_or_else(|| Arc::new(InMemoryLogStore::new()));
        let workflows: Arc<dyn WorkflowRepository> = self
            .workflows
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowRepository::new()));
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            Arc::new(DispatcherRegistry::with_builtins(
                provider.clone(),
                sessions.clone(),
                time.clone(),
            ))
        });
        let engine = ExecutionEngine::new(
            dispatcher.clone(),
            sessions.clone(),
            logs.clone(),
            time.clone(),
            ids.clone(),
        );
        Arc::new(Runtime {
            compiler: WorkflowCompiler::new(catalog.clone()),
            cache: CompileCache::new(),
            catalog,
            dispatcher,
            sessions,
            logs,
            workflows,
            provider,
            time,
            ids,
            session_ttl: self.session_ttl,
            engine,
        })
    }
}
