//! The single sequential dispatcher.
//!
//! Every event is turned into reducer applications against the current
//! snapshot. After each committed transition the machines observe the new
//! snapshot in a fixed order (recompute scheduler, persistence bridge,
//! ingestion watchers, parameter hold gate) and their decisions are carried
//! out before the next event is looked at. Nothing here is async; the
//! [`Engine`](crate::Engine) feeds events in and routes the output.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::coercion::{DefaultParameterCoercion, ParameterCoercion};
use crate::config::EngineConfig;
use crate::error::DesignError;
use crate::export::{DefaultExportCatalog, ExportCatalog};
use crate::ingestion::{title_bar_parameters, IngestionRouter};
use crate::machine::{Decision, Machine};
use crate::parameters::ParameterRouter;
use crate::persistence::PersistenceBridge;
use crate::protocol::{
    Command, Event, FileStoreEvent, GeometryResult, PersistedDesign, RemoteReply, SettingsReply,
    UiEvent, WorkerRequest, WorkerResponse, LOAD_CACHED_GEOMETRY,
};
use crate::reducers::{self, ParameterUpdate};
use crate::resolver::{DefaultProjectResolver, ProjectResolver};
use crate::scheduler::{RecomputeScheduler, RequestId, TimerOutcome};
use crate::state::{AppState, DesignOrigin, ParametersOrigin, Solid};
use crate::store::{Patch, Store};

/// Source of "now" for timing stamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Pure collaborators the reducers delegate to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn ProjectResolver>,
    pub exports: Arc<dyn ExportCatalog>,
    pub coercion: Arc<dyn ParameterCoercion>,
    pub clock: Clock,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            resolver: Arc::new(DefaultProjectResolver),
            exports: Arc::new(DefaultExportCatalog),
            coercion: Arc::new(DefaultParameterCoercion),
            clock: Arc::new(Utc::now),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// What the engine should do with the single recompute timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimerDirective {
    #[default]
    Keep,
    Arm {
        request_id: RequestId,
        duration: Duration,
    },
    Cancel,
}

/// Output of one dispatch step.
#[derive(Debug, Default, PartialEq)]
pub struct DispatchOutput {
    /// Requests to collaborators, in emission order.
    pub commands: Vec<Command>,
    /// The last timer decision of the step wins.
    pub timer: TimerDirective,
}

#[derive(Debug)]
pub struct Dispatcher {
    store: Store,
    scheduler: RecomputeScheduler,
    persistence: PersistenceBridge,
    ingestion: IngestionRouter,
    parameters: ParameterRouter,
    collaborators: Collaborators,
    config: EngineConfig,
    started: bool,
}

impl Dispatcher {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            store: Store::new(AppState::default()),
            scheduler: RecomputeScheduler::new(),
            persistence: PersistenceBridge::new(config.settings_key.clone()),
            ingestion: IngestionRouter::new(config.cached_geometry_path.clone()),
            parameters: ParameterRouter::new(),
            collaborators,
            config,
            started: false,
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.store.snapshot()
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    pub fn scheduler(&self) -> &RecomputeScheduler {
        &self.scheduler
    }

    /// Initialize the session and request the stored settings.
    pub fn start(&mut self) -> DispatchOutput {
        let mut out = DispatchOutput::default();
        if self.started {
            return out;
        }
        self.started = true;
        let state = self
            .store
            .replace(reducers::initialize_with(self.config.policy()));
        debug!("dispatch: initialized");
        out.commands.push(self.persistence.load_request());
        let mut follow_ups = VecDeque::new();
        self.observe(&state, &mut out, &mut follow_ups);
        self.drain(follow_ups, &mut out);
        out
    }

    /// Apply one event and everything it causes.
    pub fn handle(&mut self, event: Event) -> DispatchOutput {
        let mut out = self.start();
        let mut follow_ups = VecDeque::new();
        self.step(event, &mut out, &mut follow_ups);
        self.drain(follow_ups, &mut out);
        out
    }

    fn now(&self) -> DateTime<Utc> {
        (self.collaborators.clock)()
    }

    fn drain(&mut self, mut follow_ups: VecDeque<ParameterUpdate>, out: &mut DispatchOutput) {
        while let Some(update) = follow_ups.pop_front() {
            self.apply_parameters(update, out, &mut follow_ups);
        }
    }

    fn step(
        &mut self,
        event: Event,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        match event {
            Event::Ui(ui) => self.on_ui(ui, out, follow_ups),
            Event::TitleBar { url } => {
                if let Some(command) = self.ingestion.title_bar(&url) {
                    out.commands.push(command);
                    let patch = reducers::reset_design(&self.store.snapshot(), DesignOrigin::Http);
                    self.commit(patch, out, follow_ups);
                }
                if let Some(values) = title_bar_parameters(&url) {
                    self.offer(ParameterRouter::title_bar(values), out, follow_ups);
                }
            }
            Event::FilesDropped { files } => {
                let patch = reducers::reset_design(&self.store.snapshot(), DesignOrigin::Local);
                self.commit(patch, out, follow_ups);
                out.commands.push(self.ingestion.dropped(files));
            }
            Event::Files(FileStoreEvent::Added { data }) => {
                if let Some(content) = self.ingestion.content_from_added(data) {
                    self.set_content(content, out, follow_ups);
                }
            }
            Event::Files(FileStoreEvent::Watched {
                id,
                path,
                files_and_folders,
            }) => {
                if let Some(content) = self
                    .ingestion
                    .content_from_watch(&id, path, files_and_folders)
                {
                    self.set_content(content, out, follow_ups);
                }
            }
            Event::Files(FileStoreEvent::CachedGeometry { id, data }) => {
                let Some(raw) = data.filter(|_| id == LOAD_CACHED_GEOMETRY) else {
                    return;
                };
                match reducers::read_cached_geometry(&raw) {
                    Ok(result) => self.set_solids(result, out, follow_ups),
                    Err(err) => warn!("dispatch: unreadable geometry cache: {err}"),
                }
            }
            Event::Remote(RemoteReply::Loaded { id, url, data }) => {
                out.commands
                    .extend(self.ingestion.remote_loaded(&id, url, data));
            }
            Event::Remote(RemoteReply::Failed { url, error, .. }) => {
                let patch = reducers::fail_remote_load(url, error);
                self.commit(patch, out, follow_ups);
            }
            Event::Worker(response) => self.on_worker(response, out, follow_ups),
            Event::Settings(SettingsReply::Read { key, data }) => {
                self.on_settings(&key, data, out, follow_ups);
            }
            Event::Settings(SettingsReply::Written { key }) => {
                debug!(%key, "dispatch: settings written");
            }
            Event::RecomputeTimerElapsed { request_id } => {
                self.on_timer(request_id, out, follow_ups);
            }
        }
    }

    fn on_ui(
        &mut self,
        event: UiEvent,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let state = self.store.snapshot();
        match event {
            UiEvent::ExampleSelected { path } => {
                out.commands.push(self.ingestion.example_selected(path));
                self.commit(reducers::reset_design(&state, DesignOrigin::Http), out, follow_ups);
            }
            UiEvent::ParametersSubmitted { values } => {
                self.offer(ParameterRouter::manual(values), out, follow_ups);
            }
            UiEvent::ParametersEdited { values: Ok(values) } => {
                self.offer(ParameterRouter::instant(values), out, follow_ups);
            }
            UiEvent::ParametersEdited { values: Err(reason) } => {
                let patch = reducers::reject_parameters(ParametersOrigin::UiInstantUpdate, reason);
                self.commit(patch, out, follow_ups);
            }
            UiEvent::ToggleAutoReload(enabled) => {
                self.commit(reducers::toggle_auto_reload(&state, enabled), out, follow_ups);
            }
            UiEvent::ToggleInstantUpdate(enabled) => {
                self.commit(reducers::toggle_instant_update(&state, enabled), out, follow_ups);
            }
            UiEvent::ToggleVtreeMode(enabled) => {
                self.commit(reducers::toggle_vtree_mode(&state, enabled), out, follow_ups);
            }
            UiEvent::SetSolidsTimeout(millis) => {
                self.commit(reducers::set_solids_timeout(&state, millis), out, follow_ups);
            }
        }
    }

    fn on_worker(
        &mut self,
        response: WorkerResponse,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        match response {
            WorkerResponse::Solids {
                solids,
                lookup,
                lookup_counts,
            } => {
                let decoded: Result<Vec<Solid>, _> =
                    solids.into_iter().map(Solid::from_compact).collect();
                match decoded {
                    Ok(solids) => self.set_solids(
                        GeometryResult {
                            solids: Some(solids),
                            lookup,
                            lookup_counts,
                        },
                        out,
                        follow_ups,
                    ),
                    Err(err) => {
                        self.commit(reducers::fail_geometry_recompute(err.to_string()), out, follow_ups);
                    }
                }
            }
            WorkerResponse::Params {
                parameter_defaults,
                parameter_definitions,
            } => {
                let update = ParameterRouter::from_worker(parameter_defaults, parameter_definitions);
                self.offer(update, out, follow_ups);
            }
            WorkerResponse::Error { error } => {
                self.commit(reducers::fail_geometry_recompute(error), out, follow_ups);
            }
        }
    }

    fn on_settings(
        &mut self,
        key: &str,
        data: Option<serde_json::Value>,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        if key != self.persistence.key() {
            debug!(key, "dispatch: ignoring settings for another key");
            return;
        }
        if let Some(stored) = data.and_then(decode_settings) {
            let patch = reducers::set_design_settings(&self.store.snapshot(), &stored);
            self.commit(patch, out, follow_ups);
            if let Some(update) = ParameterRouter::from_store(&stored) {
                self.offer(update, out, follow_ups);
            }
        }
        // Writes produced while applying the stored payload are held, so the
        // first write released is the merged state.
        let released = self.persistence.on_read_reply(key);
        self.carry_out(released, out, follow_ups);
    }

    fn on_timer(
        &mut self,
        request_id: RequestId,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let TimerOutcome::Expired { timeout_ms } = self.scheduler.on_timer_elapsed(request_id)
        else {
            return;
        };
        let patch = reducers::timeout_geometry_recompute(&self.store.snapshot(), timeout_ms);
        if patch.is_empty() {
            debug!(%request_id, "dispatch: result arrived before the timeout");
            return;
        }
        self.commit(patch, out, follow_ups);
        if self.store.snapshot().error().is_some_and(|err| err.is_timeout()) {
            out.commands.push(Command::Worker(WorkerRequest::Cancel));
        }
    }

    fn set_content(
        &mut self,
        content: reducers::DesignContent,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let patch = reducers::set_design_content(
            &self.store.snapshot(),
            content,
            self.collaborators.resolver.as_ref(),
            self.now(),
        );
        self.commit(patch, out, follow_ups);
    }

    fn set_solids(
        &mut self,
        result: GeometryResult,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let patch = reducers::set_design_solids(
            &self.store.snapshot(),
            result,
            self.collaborators.exports.as_ref(),
            self.now(),
        );
        self.commit(patch, out, follow_ups);
    }

    fn offer(
        &mut self,
        update: ParameterUpdate,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        if let Some(update) = self.parameters.offer(update) {
            self.apply_parameters(update, out, follow_ups);
        }
    }

    fn apply_parameters(
        &mut self,
        update: ParameterUpdate,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let patch = reducers::set_design_parameters(
            &self.store.snapshot(),
            update,
            self.collaborators.coercion.as_ref(),
            self.now(),
        );
        if let Some(design) = &patch.design {
            if !self.parameters.admit(design) {
                return;
            }
        }
        self.commit(patch, out, follow_ups);
    }

    fn commit(
        &mut self,
        patch: Patch,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        if patch.is_empty() {
            return;
        }
        let state = self.store.apply(patch);
        self.observe(&state, out, follow_ups);
    }

    fn observe(
        &mut self,
        state: &Arc<AppState>,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) {
        let mut decisions: SmallVec<[Decision; 8]> = SmallVec::new();
        decisions.extend(self.scheduler.observe(state));
        decisions.extend(self.persistence.observe(state));
        decisions.extend(self.ingestion.observe(state));
        decisions.extend(self.parameters.observe(state));
        self.carry_out(decisions, out, follow_ups);
    }

    fn carry_out<I>(
        &mut self,
        decisions: I,
        out: &mut DispatchOutput,
        follow_ups: &mut VecDeque<ParameterUpdate>,
    ) where
        I: IntoIterator<Item = Decision>,
    {
        let mut begin_recompute = false;
        let mut settle_recompute = false;
        for decision in decisions {
            match decision {
                Decision::Emit(command) => out.commands.push(command),
                Decision::ArmTimer {
                    request_id,
                    duration,
                } => {
                    out.timer = TimerDirective::Arm {
                        request_id,
                        duration,
                    };
                }
                Decision::CancelTimer => out.timer = TimerDirective::Cancel,
                Decision::ApplyParameters(update) => follow_ups.push_back(update),
                Decision::BeginRecompute => begin_recompute = true,
                Decision::SettleRecompute => settle_recompute = true,
            }
        }
        if settle_recompute {
            let patch = reducers::settle_geometry_recompute(&self.store.snapshot());
            self.commit(patch, out, follow_ups);
        }
        if begin_recompute {
            let patch = reducers::begin_geometry_recompute(&self.store.snapshot());
            self.commit(patch, out, follow_ups);
        }
    }
}

fn decode_settings(raw: serde_json::Value) -> Option<PersistedDesign> {
    match serde_json::from_value(raw) {
        Ok(stored) => Some(stored),
        Err(err) => {
            let err = DesignError::InvalidSettingsPayload {
                reason: err.to_string(),
            };
            warn!("dispatch: stored settings dropped: {err}");
            None
        }
    }
}
