//! The async shell around the [`Dispatcher`].
//!
//! ```text
//! EngineHandle::emit() ──► inbound ──┐
//!                                    ├──► Dispatcher::handle() ──► snapshot (watch)
//! TimeoutSlot firing ──► fired ──────┘            │
//!                                                 ├──► timer directive ──► TimeoutSlot
//!                                                 └──► commands ──► lanes ──► Effect::execute()
//!                                                                               │
//!                             events returned by effects ◄──────────────────────┘
//! ```
//!
//! Events are processed strictly one at a time. Delivery to a lane is
//! at-most-once: a lane whose queue is full misses the request and a warning
//! is logged. A worker `cancel` is executed out of band, beside the request
//! it abandons.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coercion::ParameterCoercion;
use crate::config::EngineConfig;
use crate::dispatch::{Collaborators, DispatchOutput, Dispatcher, TimerDirective};
use crate::effect::{spawn_lane, spawn_out_of_band, Effect};
use crate::error::EngineError;
use crate::export::ExportCatalog;
use crate::protocol::{
    Command, Event, FileStoreRequest, RemoteRequest, SettingsRequest, WorkerRequest,
};
use crate::resolver::ProjectResolver;
use crate::scheduler::RequestId;
use crate::state::AppState;
use crate::timer::TimeoutSlot;

#[derive(Debug)]
enum Inbound {
    Event(Event),
    Shutdown,
}

// ============================================================================
// Builder
// ============================================================================

pub struct EngineBuilder {
    config: EngineConfig,
    collaborators: Collaborators,
    worker: Option<Arc<dyn Effect<WorkerRequest>>>,
    settings: Option<Arc<dyn Effect<SettingsRequest>>>,
    files: Option<Arc<dyn Effect<FileStoreRequest>>>,
    remote: Option<Arc<dyn Effect<RemoteRequest>>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            collaborators: Collaborators::default(),
            worker: None,
            settings: None,
            files: None,
            remote: None,
        }
    }

    pub fn with_project_resolver(mut self, resolver: impl ProjectResolver + 'static) -> Self {
        self.collaborators.resolver = Arc::new(resolver);
        self
    }

    pub fn with_export_catalog(mut self, exports: impl ExportCatalog + 'static) -> Self {
        self.collaborators.exports = Arc::new(exports);
        self
    }

    pub fn with_parameter_coercion(mut self, coercion: impl ParameterCoercion + 'static) -> Self {
        self.collaborators.coercion = Arc::new(coercion);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.collaborators.clock = Arc::new(clock);
        self
    }

    pub fn with_worker(mut self, effect: impl Effect<WorkerRequest>) -> Self {
        self.worker = Some(Arc::new(effect));
        self
    }

    pub fn with_settings_store(mut self, effect: impl Effect<SettingsRequest>) -> Self {
        self.settings = Some(Arc::new(effect));
        self
    }

    pub fn with_file_store(mut self, effect: impl Effect<FileStoreRequest>) -> Self {
        self.files = Some(Arc::new(effect));
        self
    }

    pub fn with_remote_loader(mut self, effect: impl Effect<RemoteRequest>) -> Self {
        self.remote = Some(Arc::new(effect));
        self
    }

    pub fn build(self) -> Engine {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let (fired_tx, fired_rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(self.config.clone(), self.collaborators);
        let (snapshots, snapshot_rx) = watch::channel(dispatcher.snapshot());

        Engine {
            handle: EngineHandle {
                inbound: inbound_tx,
                snapshots: snapshot_rx,
            },
            inbound: inbound_rx,
            fired: fired_rx,
            slot: TimeoutSlot::new(fired_tx),
            snapshots,
            dispatcher,
            effects: Effects {
                worker: self.worker,
                settings: self.settings,
                files: self.files,
                remote: self.remote,
            },
            capacity: self.config.output_capacity.max(1),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, cloneable access to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    inbound: mpsc::Sender<Inbound>,
    snapshots: watch::Receiver<Arc<AppState>>,
}

impl EngineHandle {
    pub async fn emit(&self, event: Event) -> Result<(), EngineError> {
        self.inbound
            .send(Inbound::Event(event))
            .await
            .map_err(|_| EngineError::EventChannelClosed)
    }

    /// Ask the engine loop to stop after the events already queued.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.inbound
            .send(Inbound::Shutdown)
            .await
            .map_err(|_| EngineError::EventChannelClosed)
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<AppState> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.snapshots.clone()
    }

    /// Wait until a committed snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&AppState) -> bool,
    ) -> Result<Arc<AppState>, EngineError> {
        let mut snapshots = self.snapshots.clone();
        let state = snapshots
            .wait_for(|state| predicate(&**state))
            .await
            .map_err(|_| EngineError::SnapshotChannelClosed)?;
        Ok(Arc::clone(&state))
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct Effects {
    worker: Option<Arc<dyn Effect<WorkerRequest>>>,
    settings: Option<Arc<dyn Effect<SettingsRequest>>>,
    files: Option<Arc<dyn Effect<FileStoreRequest>>>,
    remote: Option<Arc<dyn Effect<RemoteRequest>>>,
}

struct Lanes {
    handle: EngineHandle,
    worker: Option<mpsc::Sender<WorkerRequest>>,
    settings: Option<mpsc::Sender<SettingsRequest>>,
    files: Option<mpsc::Sender<FileStoreRequest>>,
    remote: Option<mpsc::Sender<RemoteRequest>>,
    /// Cancellations bypass the worker lane.
    canceller: Option<Arc<dyn Effect<WorkerRequest>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Lanes {
    fn open_all(effects: Effects, capacity: usize, handle: &EngineHandle) -> Self {
        let mut lanes = Lanes {
            handle: handle.clone(),
            worker: None,
            settings: None,
            files: None,
            remote: None,
            canceller: effects.worker.clone(),
            tasks: Vec::new(),
        };
        lanes.worker = lanes.open("worker", effects.worker, capacity);
        lanes.settings = lanes.open("settings", effects.settings, capacity);
        lanes.files = lanes.open("files", effects.files, capacity);
        lanes.remote = lanes.open("remote", effects.remote, capacity);
        lanes
    }

    fn open<C>(
        &mut self,
        name: &'static str,
        effect: Option<Arc<dyn Effect<C>>>,
        capacity: usize,
    ) -> Option<mpsc::Sender<C>>
    where
        C: std::fmt::Debug + Send + 'static,
    {
        let effect = effect?;
        let (tx, rx) = mpsc::channel(capacity);
        self.tasks
            .push(spawn_lane(name, effect, rx, self.handle.clone()));
        Some(tx)
    }

    fn route(&mut self, command: Command) {
        match command {
            Command::Worker(WorkerRequest::Cancel) => self.cancel_worker(),
            Command::Worker(request) => deliver("worker", self.worker.as_ref(), request),
            Command::Settings(request) => deliver("settings", self.settings.as_ref(), request),
            Command::Files(request) => deliver("files", self.files.as_ref(), request),
            Command::Remote(request) => deliver("remote", self.remote.as_ref(), request),
        }
    }

    fn cancel_worker(&mut self) {
        let Some(worker) = &self.canceller else {
            debug!("engine: no worker registered, dropping cancel");
            return;
        };
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(spawn_out_of_band(
            "worker",
            Arc::clone(worker),
            WorkerRequest::Cancel,
            self.handle.clone(),
        ));
    }

    fn close(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

fn deliver<C: std::fmt::Debug>(lane: &'static str, sender: Option<&mpsc::Sender<C>>, request: C) {
    let Some(sender) = sender else {
        debug!(lane, ?request, "engine: no effect registered, dropping request");
        return;
    };
    if let Err(err) = sender.try_send(request) {
        warn!(lane, "engine: request not delivered: {err}");
    }
}

pub struct Engine {
    handle: EngineHandle,
    inbound: mpsc::Receiver<Inbound>,
    fired: mpsc::Receiver<RequestId>,
    slot: TimeoutSlot,
    snapshots: watch::Sender<Arc<AppState>>,
    dispatcher: Dispatcher,
    effects: Effects,
    capacity: usize,
}

impl Engine {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Spawn the engine loop and return a handle to it.
    pub fn start(self) -> EngineHandle {
        let handle = self.handle();
        tokio::spawn(async move {
            if let Err(err) = self.run().await {
                warn!("engine stopped: {err}");
            }
        });
        handle
    }

    /// Process events until [`EngineHandle::shutdown`] is called.
    ///
    /// Lanes hold handles of their own, so the inbound channel never closes
    /// while the engine runs.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let effects = std::mem::take(&mut self.effects);
        let mut lanes = Lanes::open_all(effects, self.capacity, &self.handle);

        info!("engine: started");
        let output = self.dispatcher.start();
        self.apply(output, &mut lanes);

        loop {
            let event = tokio::select! {
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Event(event)) => event,
                    Some(Inbound::Shutdown) | None => break,
                },
                Some(request_id) = self.fired.recv() => Event::RecomputeTimerElapsed { request_id },
            };
            let output = self.dispatcher.handle(event);
            self.apply(output, &mut lanes);
        }

        self.slot.cancel();
        lanes.close();
        info!("engine: stopped");
        Ok(())
    }

    fn apply(&mut self, output: DispatchOutput, lanes: &mut Lanes) {
        match output.timer {
            TimerDirective::Keep => {}
            TimerDirective::Arm {
                request_id,
                duration,
            } => self.slot.arm(request_id, duration),
            TimerDirective::Cancel => self.slot.cancel(),
        }
        for command in output.commands {
            lanes.route(command);
        }
        self.snapshots.send_replace(self.dispatcher.snapshot());
    }
}
