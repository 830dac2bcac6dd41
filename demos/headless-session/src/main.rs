//! # Headless Session Example
//!
//! Runs one design session against in-memory collaborators: the design is
//! fetched from a "remote" URL, computed by a fake worker, then a parameter
//! edit triggers a second recompute and the settings are saved.

use anyhow::Result;
use designflow::{EngineConfig, Event, ParamDef, ParamKind, UiEvent};
use designflow_testing::{
    init_tracing, FakeWorker, MemorySettingsStore, Session, StaticRemoteLoader,
};
use serde_json::json;
use tracing::info;

const DESIGN_URL: &str = "https://designs.example/gears/spur-gear.js";

const DESIGN_SOURCE: &str = r#"
function getParameterDefinitions() {
  return [{ name: 'teeth', type: 'int', initial: 12, min: 6, max: 48 }]
}
function main({ teeth }) {
  return cylinder({ r: teeth / 2, h: 2 })
}
"#;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let defaults = json!({"teeth": 12}).as_object().cloned().unwrap_or_default();
    let worker = FakeWorker::new()
        .with_params(
            defaults,
            vec![ParamDef::new("teeth", ParamKind::Int).with_range(6.0, 48.0)],
        )
        .with_solids(vec![json!({"class": "CSG", "polygons": []})]);
    let settings = MemorySettingsStore::new()
        .with_entry("design", json!({"vtreeMode": false, "solidsTimeOut": 5000}));

    let session = Session::builder(EngineConfig::default())
        .worker(worker)
        .settings(settings.clone())
        .remote(StaticRemoteLoader::new([(DESIGN_URL, DESIGN_SOURCE)]))
        .start();

    session
        .emit(Event::Ui(UiEvent::ExampleSelected {
            path: DESIGN_URL.to_string(),
        }))
        .await?;
    let state = session
        .wait_for(|state| !state.design.solids.is_empty() && !state.is_busy())
        .await?;
    info!(
        name = %state.design.name,
        main_path = %state.design.main_path,
        solids = state.design.solids.len(),
        total_time_ms = state.design.debug.total_time,
        "design ready"
    );
    println!("{}", state.app_title);

    let edit = json!({"teeth": "30"}).as_object().cloned().unwrap_or_default();
    session
        .emit(Event::Ui(UiEvent::ParametersSubmitted { values: edit }))
        .await?;
    let state = session
        .wait_for(|state| {
            state.design.parameter_values.get("teeth") == Some(&json!(30)) && !state.is_busy()
        })
        .await?;
    println!(
        "teeth = {}, export formats: {}",
        state.design.parameter_values["teeth"],
        state
            .io
            .as_ref()
            .map(|io| io.available_export_formats.join(", "))
            .unwrap_or_default()
    );

    for _ in 0..50 {
        if settings.get("design").is_some_and(|saved| saved["name"] == json!("spur-gear")) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    println!("saved settings: {}", settings.get("design").unwrap_or_default());
    println!("worker requests: {}", session.worker.requests().len());

    session.shutdown().await?;
    Ok(())
}
