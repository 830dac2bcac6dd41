use std::time::Duration;

use designflow::protocol::{SettingsRequest, WorkerRequest};
use designflow::{
    DesignError, DesignOrigin, EngineConfig, Event, FileNode, ParamDef, ParamKind, UiEvent,
    DEFAULT_CACHED_GEOMETRY_PATH,
};
use designflow_testing::{
    init_tracing, FakeWorker, MemorySettingsStore, Session, StaticRemoteLoader,
};
use serde_json::json;

const GEAR_URL: &str = "https://cdn.test/designs/gear.js";
const GEAR_SOURCE: &str = "function main(params) { return cylinder({ r: params.teeth }) }";

fn gear_remote() -> StaticRemoteLoader {
    StaticRemoteLoader::new([(GEAR_URL, GEAR_SOURCE)])
}

fn solid() -> serde_json::Value {
    json!({"class": "CSG", "polygons": [], "isRetesselated": false})
}

/// Poll `condition` on virtual time until it holds.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test(start_paused = true)]
async fn a_remote_example_is_loaded_computed_and_cached() {
    init_tracing();
    let session = Session::builder(EngineConfig::default())
        .worker(FakeWorker::new().with_solids(vec![solid()]))
        .remote(gear_remote())
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: GEAR_URL.to_string(),
        }))
        .await
        .unwrap();
    let state = session
        .wait_for(|state| state.design.solids.len() == 1)
        .await
        .unwrap();

    assert_eq!(state.design.name, "gear");
    assert_eq!(state.design.main_path, GEAR_URL);
    assert_eq!(state.design.origin, Some(DesignOrigin::Http));
    assert!(!state.is_busy());
    assert_eq!(
        state.io.as_ref().map(|io| io.available_export_formats.len()),
        Some(6)
    );
    assert!(state.app_title.ends_with(": gear"));

    let files = session.files.clone();
    assert!(eventually(|| files.written(DEFAULT_CACHED_GEOMETRY_PATH).is_some()).await);
    assert_eq!(files.watches(), vec![(GEAR_URL.to_string(), true)]);
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stored_settings_are_applied_before_anything_is_saved() {
    let settings = MemorySettingsStore::new().with_entry(
        "design",
        json!({"vtreeMode": false, "autoReload": false, "parameterValues": {"teeth": 10}}),
    );
    let session = Session::builder(EngineConfig::default())
        .worker(FakeWorker::new().with_solids(vec![solid()]))
        .settings(settings.clone())
        .remote(gear_remote())
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: GEAR_URL.to_string(),
        }))
        .await
        .unwrap();
    let worker = session.worker.clone();
    assert!(
        eventually(|| worker
            .generated()
            .last()
            .is_some_and(|request| request.parameter_values.get("teeth") == Some(&json!(10))))
        .await
    );
    assert!(!session.snapshot().design.auto_reload);

    assert!(eventually(|| settings.get("design").is_some_and(|stored| {
        stored["name"] == json!("gear") && stored["parameterValues"] == json!({"teeth": 10})
    }))
    .await);
    let log = settings.log();
    assert!(matches!(log.first(), Some(SettingsRequest::Read { .. })));
    let stored = settings.get("design").unwrap();
    assert_eq!(stored["autoReload"], json!(false));
    assert_eq!(stored["parameterValues"], json!({"teeth": 10}));
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_hanging_worker_is_timed_out_and_cancelled() {
    let config = EngineConfig {
        default_solids_time_out_ms: 100,
        ..EngineConfig::default()
    };
    let session = Session::builder(config)
        .worker(FakeWorker::new().hanging())
        .start();

    session
        .emit(Event::FilesDropped {
            files: vec![FileNode::folder(
                "/gear",
                vec![FileNode::file("/gear/index.js", GEAR_SOURCE)],
            )],
        })
        .await
        .unwrap();
    let state = session
        .wait_for(|state| state.error().is_some())
        .await
        .unwrap();

    assert_eq!(
        state.error(),
        Some(&DesignError::RecomputeTimeout { timeout_ms: 100 })
    );
    assert!(!state.is_busy());
    assert_eq!(state.design.main_path, "/gear/index.js");
    assert_eq!(state.design.origin, Some(DesignOrigin::Local));

    let worker = session.worker.clone();
    assert!(eventually(|| worker.cancels() == 1).await);
    assert!(
        eventually(|| worker.abandoned() == 1).await,
        "the cancel reaches the worker while it is still stuck on the request"
    );
    assert!(matches!(
        worker.requests().first(),
        Some(WorkerRequest::Generate(_))
    ));
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn worker_failures_surface_in_status() {
    let session = Session::builder(EngineConfig::default())
        .worker(FakeWorker::new().failing("main is not a function"))
        .remote(gear_remote())
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: GEAR_URL.to_string(),
        }))
        .await
        .unwrap();
    let state = session.settled().await.unwrap();
    assert_eq!(
        state.error(),
        Some(&DesignError::WorkerComputation {
            message: "main is not a function".to_string()
        })
    );
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missing_remote_documents_surface_in_status() {
    let session = Session::builder(EngineConfig::default())
        .remote(gear_remote())
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: "https://cdn.test/missing.js".to_string(),
        }))
        .await
        .unwrap();
    let state = session
        .wait_for(|state| state.error().is_some())
        .await
        .unwrap();
    assert!(matches!(
        state.error(),
        Some(DesignError::RemoteLoad { url, .. }) if url == "https://cdn.test/missing.js"
    ));
    assert!(session.worker.generated().is_empty());
    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn worker_defaults_become_the_parameter_values() {
    let defaults = json!({"teeth": 12}).as_object().cloned().unwrap();
    let definitions = vec![ParamDef::new("teeth", ParamKind::Int).with_range(4.0, 64.0)];
    let session = Session::builder(EngineConfig::default())
        .worker(
            FakeWorker::new()
                .with_solids(vec![solid()])
                .with_params(defaults, definitions),
        )
        .remote(gear_remote())
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: GEAR_URL.to_string(),
        }))
        .await
        .unwrap();
    let worker = session.worker.clone();
    assert!(eventually(|| worker.generated().len() == 2).await);
    assert_eq!(
        worker.generated()[1].parameter_values.get("teeth"),
        Some(&json!(12))
    );

    session
        .emit(Event::Ui(UiEvent::ParametersSubmitted {
            values: json!({"teeth": "100"}).as_object().cloned().unwrap(),
        }))
        .await
        .unwrap();
    assert!(eventually(|| worker.generated().len() == 3).await);
    assert_eq!(
        worker.generated()[2].parameter_values.get("teeth"),
        Some(&json!(64)),
        "values are clamped to the definition's range"
    );
    session.shutdown().await.unwrap();
}
