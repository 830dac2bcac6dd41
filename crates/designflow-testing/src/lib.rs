//! In-memory collaborators for designflow sessions.
//!
//! Every fake is cheap to clone and shares its state between clones, so a
//! test keeps one copy for assertions and hands the other to the engine.
//!
//! ```ignore
//! let session = Session::start(EngineConfig::default());
//! session.emit(Event::Ui(UiEvent::ExampleSelected { path: url })).await?;
//! let state = session.settled().await?;
//! assert_eq!(session.worker.generated().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use designflow::protocol::{
    AddData, FileStoreRequest, GenerateRequest, RemoteReply, RemoteRequest, SettingsReply,
    SettingsRequest, WorkerRequest,
};
use designflow::{
    AppState, Effect, EffectContext, EngineBuilder, EngineConfig, EngineError, EngineHandle, Event,
    FileNode, FileStoreEvent, ParamDef, ValueMap, WorkerResponse,
};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

/// Install a test-friendly subscriber once; later calls are no-ops.
///
/// Filtering follows `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Worker
// ============================================================================

#[derive(Debug, Default)]
struct WorkerState {
    requests: Vec<WorkerRequest>,
    solids: Vec<Value>,
    params: Option<(ValueMap, Vec<ParamDef>)>,
    failure: Option<String>,
    hanging: bool,
    abandoned: usize,
}

/// A geometry worker that answers every `generate` with canned solids.
#[derive(Debug, Clone, Default)]
pub struct FakeWorker {
    state: Arc<Mutex<WorkerState>>,
    cancelled: Arc<Notify>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solids returned for every request, in their compact form.
    pub fn with_solids(self, solids: Vec<Value>) -> Self {
        lock(&self.state).solids = solids;
        self
    }

    /// Parameter defaults and definitions, reported once before the first
    /// solids.
    pub fn with_params(self, defaults: ValueMap, definitions: Vec<ParamDef>) -> Self {
        lock(&self.state).params = Some((defaults, definitions));
        self
    }

    /// Answer every request with an error payload.
    pub fn failing(self, message: impl Into<String>) -> Self {
        lock(&self.state).failure = Some(message.into());
        self
    }

    /// Never answer: every `generate` blocks until a `cancel` arrives.
    pub fn hanging(self) -> Self {
        lock(&self.state).hanging = true;
        self
    }

    pub fn requests(&self) -> Vec<WorkerRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn generated(&self) -> Vec<GenerateRequest> {
        lock(&self.state)
            .requests
            .iter()
            .filter_map(|request| match request {
                WorkerRequest::Generate(generate) => Some(generate.clone()),
                WorkerRequest::Cancel => None,
            })
            .collect()
    }

    /// Hanging requests released by a cancel.
    pub fn abandoned(&self) -> usize {
        lock(&self.state).abandoned
    }

    pub fn cancels(&self) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|request| matches!(request, WorkerRequest::Cancel))
            .count()
    }
}

#[async_trait]
impl Effect<WorkerRequest> for FakeWorker {
    async fn execute(
        &self,
        request: WorkerRequest,
        _ctx: EffectContext,
    ) -> anyhow::Result<Vec<Event>> {
        let generate = {
            let mut state = lock(&self.state);
            state.requests.push(request.clone());
            match request {
                WorkerRequest::Generate(generate) => generate,
                WorkerRequest::Cancel => {
                    debug!("fake worker: cancelled");
                    self.cancelled.notify_one();
                    return Ok(Vec::new());
                }
            }
        };
        let hanging = lock(&self.state).hanging;
        if hanging {
            self.cancelled.notified().await;
            lock(&self.state).abandoned += 1;
            return Ok(Vec::new());
        }

        let mut state = lock(&self.state);
        if let Some(error) = state.failure.clone() {
            return Ok(vec![Event::Worker(WorkerResponse::Error { error })]);
        }

        let mut events = Vec::new();
        if let Some((defaults, definitions)) = state.params.take() {
            events.push(Event::Worker(WorkerResponse::Params {
                parameter_defaults: Some(defaults),
                parameter_definitions: Some(definitions),
            }));
        }
        events.push(Event::Worker(WorkerResponse::Solids {
            solids: state.solids.clone(),
            lookup: Some(generate.lookup),
            lookup_counts: Some(generate.lookup_counts),
        }));
        Ok(events)
    }
}

// ============================================================================
// Settings store
// ============================================================================

#[derive(Debug, Default)]
struct SettingsState {
    entries: HashMap<String, Value>,
    log: Vec<SettingsRequest>,
}

/// A key/value settings store.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    state: Arc<Mutex<SettingsState>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: impl Into<String>, data: Value) -> Self {
        lock(&self.state).entries.insert(key.into(), data);
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.state).entries.get(key).cloned()
    }

    /// Every request received, in order.
    pub fn log(&self) -> Vec<SettingsRequest> {
        lock(&self.state).log.clone()
    }
}

#[async_trait]
impl Effect<SettingsRequest> for MemorySettingsStore {
    async fn execute(
        &self,
        request: SettingsRequest,
        _ctx: EffectContext,
    ) -> anyhow::Result<Vec<Event>> {
        let mut state = lock(&self.state);
        state.log.push(request.clone());
        let reply = match request {
            SettingsRequest::Read { key } => {
                let data = state.entries.get(&key).cloned();
                SettingsReply::Read { key, data }
            }
            SettingsRequest::Write { key, data } => {
                state.entries.insert(key.clone(), serde_json::to_value(data)?);
                SettingsReply::Written { key }
            }
        };
        Ok(vec![Event::Settings(reply)])
    }
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Default)]
struct FileState {
    requests: Vec<FileStoreRequest>,
    written: HashMap<String, String>,
}

/// A file store that echoes added trees back and keeps written blobs.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileStore {
    state: Arc<Mutex<FileState>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<FileStoreRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn written(&self, path: &str) -> Option<String> {
        lock(&self.state).written.get(path).cloned()
    }

    /// Paths of every watch request, with their enabled flag.
    pub fn watches(&self) -> Vec<(String, bool)> {
        lock(&self.state)
            .requests
            .iter()
            .filter_map(|request| match request {
                FileStoreRequest::Watch { path, options, .. } => {
                    Some((path.clone(), options.enabled))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Effect<FileStoreRequest> for MemoryFileStore {
    async fn execute(
        &self,
        request: FileStoreRequest,
        _ctx: EffectContext,
    ) -> anyhow::Result<Vec<Event>> {
        let mut state = lock(&self.state);
        state.requests.push(request.clone());
        match request {
            FileStoreRequest::Add { path, data, .. } => {
                let tree = match data {
                    AddData::Tree(tree) => tree,
                    AddData::Raw(source) => vec![FileNode::file(path, source)],
                };
                Ok(vec![Event::Files(FileStoreEvent::Added { data: tree })])
            }
            FileStoreRequest::Write { path, data, .. } => {
                state.written.insert(path, data);
                Ok(Vec::new())
            }
            FileStoreRequest::Watch { .. } => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Remote loader
// ============================================================================

/// Serves fixed documents by URL; unknown URLs fail.
#[derive(Debug, Clone, Default)]
pub struct StaticRemoteLoader {
    documents: Arc<HashMap<String, String>>,
}

impl StaticRemoteLoader {
    pub fn new<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            documents: Arc::new(
                documents
                    .into_iter()
                    .map(|(url, body)| (url.into(), body.into()))
                    .collect(),
            ),
        }
    }

    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: {url}"))
    }
}

#[async_trait]
impl Effect<RemoteRequest> for StaticRemoteLoader {
    async fn execute(
        &self,
        request: RemoteRequest,
        _ctx: EffectContext,
    ) -> anyhow::Result<Vec<Event>> {
        let RemoteRequest::Read { id, urls } = request;
        Ok(urls
            .into_iter()
            .map(|url| {
                let reply = match self.fetch(&url) {
                    Ok(data) => RemoteReply::Loaded {
                        id: id.clone(),
                        url,
                        data,
                    },
                    Err(err) => RemoteReply::Failed {
                        id: id.clone(),
                        url,
                        error: err.to_string(),
                    },
                };
                Event::Remote(reply)
            })
            .collect())
    }
}

// ============================================================================
// Session
// ============================================================================

/// A running engine wired to in-memory collaborators.
pub struct Session {
    pub handle: EngineHandle,
    pub worker: FakeWorker,
    pub settings: MemorySettingsStore,
    pub files: MemoryFileStore,
    pub remote: StaticRemoteLoader,
}

impl Session {
    pub fn builder(config: EngineConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            worker: FakeWorker::new(),
            settings: MemorySettingsStore::new(),
            remote: StaticRemoteLoader::default(),
        }
    }

    /// Start a session with default fakes. Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig) -> Self {
        Self::builder(config).start()
    }

    pub async fn emit(&self, event: Event) -> Result<(), EngineError> {
        self.handle.emit(event).await
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.handle.snapshot()
    }

    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&AppState) -> bool,
    ) -> Result<Arc<AppState>, EngineError> {
        self.handle.wait_for(predicate).await
    }

    /// Wait for a valid design whose recompute has finished, one way or another.
    pub async fn settled(&self) -> Result<Arc<AppState>, EngineError> {
        self.wait_for(|state| {
            designflow::is_design_valid(&state.design)
                && state.status.as_ref().is_some_and(|status| !status.busy)
        })
        .await
    }

    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.handle.shutdown().await
    }
}

pub struct SessionBuilder {
    config: EngineConfig,
    worker: FakeWorker,
    settings: MemorySettingsStore,
    remote: StaticRemoteLoader,
}

impl SessionBuilder {
    pub fn worker(mut self, worker: FakeWorker) -> Self {
        self.worker = worker;
        self
    }

    pub fn settings(mut self, settings: MemorySettingsStore) -> Self {
        self.settings = settings;
        self
    }

    pub fn remote(mut self, remote: StaticRemoteLoader) -> Self {
        self.remote = remote;
        self
    }

    pub fn start(self) -> Session {
        let files = MemoryFileStore::new();
        let handle = EngineBuilder::new(self.config)
            .with_worker(self.worker.clone())
            .with_settings_store(self.settings.clone())
            .with_file_store(files.clone())
            .with_remote_loader(self.remote.clone())
            .build()
            .start();
        Session {
            handle,
            worker: self.worker,
            settings: self.settings,
            files,
            remote: self.remote,
        }
    }
}
