//! End-to-end session scenarios, driven through the dispatcher and the engine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::dispatch::{Collaborators, DispatchOutput, Dispatcher, TimerDirective};
use crate::effect::{Effect, EffectContext};
use crate::engine::EngineBuilder;
use crate::protocol::{
    Command, Event, FileStoreEvent, PersistedDesign, SettingsReply, SettingsRequest, UiEvent,
    WorkerRequest, WorkerResponse,
};
use crate::reducers;
use crate::state::FileNode;
use crate::{DesignError, EngineConfig};

// ============================================================================
// Harness
// ============================================================================

/// A clock the test moves by hand, in milliseconds since the epoch.
fn manual_clock() -> (Arc<AtomicI64>, Collaborators) {
    let millis = Arc::new(AtomicI64::new(1_000));
    let source = Arc::clone(&millis);
    let collaborators = Collaborators {
        clock: Arc::new(move || -> DateTime<Utc> {
            Utc.timestamp_millis_opt(source.load(Ordering::SeqCst))
                .single()
                .unwrap_or_default()
        }),
        ..Collaborators::default()
    };
    (millis, collaborators)
}

fn session(config: EngineConfig) -> (Arc<AtomicI64>, Dispatcher) {
    let (clock, collaborators) = manual_clock();
    (clock, Dispatcher::new(config, collaborators))
}

fn added(path: &str) -> Event {
    Event::Files(FileStoreEvent::Added {
        data: vec![FileNode::file(path, "function main() { return cube() }")],
    })
}

fn read_reply(data: serde_json::Value) -> Event {
    Event::Settings(SettingsReply::Read {
        key: "design".to_string(),
        data: Some(data),
    })
}

fn generate_values(out: &DispatchOutput) -> Vec<serde_json::Value> {
    out.commands
        .iter()
        .filter_map(|command| match command {
            Command::Worker(WorkerRequest::Generate(request)) => {
                Some(serde_json::Value::Object(request.parameter_values.clone()))
            }
            _ => None,
        })
        .collect()
}

fn settings_writes(out: &DispatchOutput) -> usize {
    out.commands
        .iter()
        .filter(|command| matches!(command, Command::Settings(SettingsRequest::Write { .. })))
        .count()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn fresh_start_to_first_geometry() {
    let (clock, mut dispatcher) = session(EngineConfig::default());
    dispatcher.start();
    let state = dispatcher.snapshot();
    assert_eq!(state.design.name, "");
    assert_eq!(state.status, None);

    dispatcher.handle(read_reply(json!({"parameterValues": {"a": 1}, "autoReload": true})));

    let out = dispatcher.handle(added("/gears/index.js"));
    let state = dispatcher.snapshot();
    assert!(state.is_busy());
    assert_eq!(state.design.main_path, "/gears/index.js");
    assert_eq!(
        serde_json::Value::Object(state.design.parameter_values.clone()),
        json!({"a": 1})
    );
    assert_eq!(generate_values(&out).last(), Some(&json!({"a": 1})));

    clock.store(1_250, Ordering::SeqCst);
    let out = dispatcher.handle(Event::Worker(WorkerResponse::Solids {
        solids: vec![json!({"class": "CSG", "polygons": [], "isRetesselated": false})],
        lookup: Some(serde_json::Map::new()),
        lookup_counts: Some(serde_json::Map::new()),
    }));
    let state = dispatcher.snapshot();
    assert!(!state.is_busy());
    assert_eq!(state.design.solids.len(), 1);
    assert_eq!(out.timer, TimerDirective::Cancel);
    assert_eq!(
        state.design.debug.total_time,
        (state.design.debug.end_time - state.design.debug.start_time).num_milliseconds()
    );
}

#[test]
fn a_result_before_the_timer_makes_the_timer_a_no_op() {
    let (_, mut dispatcher) = session(EngineConfig::default());
    let TimerDirective::Arm { request_id, .. } = dispatcher.handle(added("/gears/gear.js")).timer
    else {
        panic!("timer not armed");
    };
    dispatcher.handle(Event::Worker(WorkerResponse::Solids {
        solids: Vec::new(),
        lookup: None,
        lookup_counts: None,
    }));

    let after_result = dispatcher.snapshot();
    let out = dispatcher.handle(Event::RecomputeTimerElapsed { request_id });
    assert!(out.commands.is_empty());
    assert!(Arc::ptr_eq(&after_result, &dispatcher.snapshot()));
    assert_eq!(dispatcher.snapshot().error(), None);
}

#[test]
fn a_timeout_is_applied_once() {
    let (_, mut dispatcher) = session(EngineConfig::default());
    let TimerDirective::Arm { request_id, .. } = dispatcher.handle(added("/gears/gear.js")).timer
    else {
        panic!("timer not armed");
    };
    let first = dispatcher.handle(Event::RecomputeTimerElapsed { request_id });
    assert_eq!(first.commands, vec![Command::Worker(WorkerRequest::Cancel)]);

    let version = dispatcher.version();
    let second = dispatcher.handle(Event::RecomputeTimerElapsed { request_id });
    assert!(second.commands.is_empty());
    assert_eq!(dispatcher.version(), version);
}

#[test]
fn the_timer_duration_follows_the_live_setting() {
    let (_, mut dispatcher) = session(EngineConfig::default());
    dispatcher.handle(read_reply(json!({"vtreeMode": false, "solidsTimeOut": 2500})));
    let out = dispatcher.handle(added("/gears/gear.js"));
    assert!(matches!(out.timer, TimerDirective::Arm { duration, .. }
        if duration == Duration::from_millis(2500)));

    dispatcher.handle(Event::Ui(UiEvent::SetSolidsTimeout(40_000)));
    let out = dispatcher.handle(Event::Ui(UiEvent::ParametersSubmitted {
        values: json!({"teeth": 12}).as_object().cloned().unwrap(),
    }));
    assert!(matches!(out.timer, TimerDirective::Arm { duration, .. }
        if duration == Duration::from_millis(40_000)));
}

#[test]
fn live_edits_are_suppressed_without_instant_update() {
    let config = EngineConfig {
        default_instant_update: false,
        ..EngineConfig::default()
    };
    let (_, mut dispatcher) = session(config);
    dispatcher.handle(added("/gears/gear.js"));
    dispatcher.handle(Event::Ui(UiEvent::ParametersSubmitted {
        values: json!({"a": 1}).as_object().cloned().unwrap(),
    }));

    let out = dispatcher.handle(Event::Ui(UiEvent::ParametersEdited {
        values: Ok(json!({"a": 5}).as_object().cloned().unwrap()),
    }));
    let state = dispatcher.snapshot();
    assert_eq!(
        serde_json::Value::Object(state.design.parameter_values.clone()),
        json!({"a": 1})
    );
    assert!(generate_values(&out).is_empty());
}

#[test]
fn nothing_is_saved_before_settings_are_loaded() {
    let (_, mut dispatcher) = session(EngineConfig::default());
    let mut writes = settings_writes(&dispatcher.start());
    writes += settings_writes(&dispatcher.handle(added("/gears/gear.js")));
    writes += settings_writes(&dispatcher.handle(Event::Ui(UiEvent::ToggleAutoReload(false))));
    writes += settings_writes(&dispatcher.handle(Event::Ui(UiEvent::ToggleVtreeMode(true))));
    assert_eq!(writes, 0);

    let out = dispatcher.handle(read_reply(json!({"vtreeMode": false})));
    let written: Vec<&PersistedDesign> = out
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::Settings(SettingsRequest::Write { data, .. }) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].name.as_deref(), Some("gear"));
    assert_eq!(written[0].vtree_mode, Some(false));
    assert_eq!(written[0].auto_reload, Some(false));

    let out = dispatcher.handle(Event::Ui(UiEvent::ToggleInstantUpdate(false)));
    assert_eq!(settings_writes(&out), 1);
}

#[test]
fn settings_without_vtree_mode_are_a_no_op() {
    let state = reducers::initialize();
    let patch = reducers::set_design_settings(
        &state,
        &PersistedDesign {
            auto_reload: Some(false),
            ..PersistedDesign::default()
        },
    );
    let design = patch.design.unwrap();
    assert!(Arc::ptr_eq(&design, &state.design));
}

// ============================================================================
// Engine scenarios
// ============================================================================

#[derive(Default)]
struct SilentWorker {
    requests: Mutex<Vec<WorkerRequest>>,
}

#[async_trait::async_trait]
impl Effect<WorkerRequest> for Arc<SilentWorker> {
    async fn execute(
        &self,
        request: WorkerRequest,
        _ctx: EffectContext,
    ) -> anyhow::Result<Vec<Event>> {
        self.requests.lock().unwrap().push(request);
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn an_unanswered_recompute_times_out_and_is_cancelled() {
    let worker = Arc::new(SilentWorker::default());
    let config = EngineConfig {
        default_solids_time_out_ms: 100,
        ..EngineConfig::default()
    };
    let handle = EngineBuilder::new(config)
        .with_worker(Arc::clone(&worker))
        .build()
        .start();

    handle.emit(added("/gears/gear.js")).await.unwrap();
    let state = handle
        .wait_for(|state| state.error().is_some())
        .await
        .unwrap();
    assert!(!state.is_busy());
    assert_eq!(
        state.error(),
        Some(&DesignError::RecomputeTimeout { timeout_ms: 100 })
    );

    for _ in 0..100 {
        if worker.requests.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    let requests = worker.requests.lock().unwrap().clone();
    assert!(matches!(requests.first(), Some(WorkerRequest::Generate(_))));
    assert_eq!(requests.last(), Some(&WorkerRequest::Cancel));
    handle.shutdown().await.unwrap();
}
